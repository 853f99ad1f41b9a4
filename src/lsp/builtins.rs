use std::sync::OnceLock;

/// One language builtin, with the precomputed strings completion and hover
/// hand out.
pub struct Builtin {
    pub name: &'static str,
    pub signature: &'static str,
    pub snippet: &'static str,
    pub documentation: &'static str,
}

/// Builtins list, built once per process on first use.
pub fn builtins() -> &'static [Builtin] {
    static BUILTINS: OnceLock<Vec<Builtin>> = OnceLock::new();
    BUILTINS.get_or_init(builtin_list)
}

fn builtin_list() -> Vec<Builtin> {
    vec![
        Builtin {
            name: "@import",
            signature: "@import(comptime path: []const u8) type",
            snippet: "@import(\"${1}\")",
            documentation: "Imports the file at the given path and returns its root container type.",
        },
        Builtin {
            name: "@This",
            signature: "@This() type",
            snippet: "@This()",
            documentation: "Returns the innermost container type the call appears in.",
        },
        Builtin {
            name: "@TypeOf",
            signature: "@TypeOf(...) type",
            snippet: "@TypeOf(${1})",
            documentation: "Returns the type of the given expression, evaluated at compile time.",
        },
        Builtin {
            name: "@as",
            signature: "@as(comptime T: type, expression) T",
            snippet: "@as(${1:T}, ${2})",
            documentation: "Coerces the expression to type T when the coercion is unambiguous and safe.",
        },
        Builtin {
            name: "@sizeOf",
            signature: "@sizeOf(comptime T: type) comptime_int",
            snippet: "@sizeOf(${1:T})",
            documentation: "Number of bytes it takes to store T in memory.",
        },
        Builtin {
            name: "@alignOf",
            signature: "@alignOf(comptime T: type) comptime_int",
            snippet: "@alignOf(${1:T})",
            documentation: "The alignment of type T in bytes.",
        },
        Builtin {
            name: "@intCast",
            signature: "@intCast(integer: anytype) anytype",
            snippet: "@intCast(${1})",
            documentation: "Converts between integer types, asserting the value fits.",
        },
        Builtin {
            name: "@floatCast",
            signature: "@floatCast(float: anytype) anytype",
            snippet: "@floatCast(${1})",
            documentation: "Converts between float types, possibly losing precision.",
        },
        Builtin {
            name: "@intFromFloat",
            signature: "@intFromFloat(float: anytype) anytype",
            snippet: "@intFromFloat(${1})",
            documentation: "Converts the integer part of a float to an integer, asserting it fits.",
        },
        Builtin {
            name: "@floatFromInt",
            signature: "@floatFromInt(int: anytype) anytype",
            snippet: "@floatFromInt(${1})",
            documentation: "Converts an integer to a float.",
        },
        Builtin {
            name: "@intFromEnum",
            signature: "@intFromEnum(enum_or_tagged_union: anytype) anytype",
            snippet: "@intFromEnum(${1})",
            documentation: "Returns the integer tag value of an enum value.",
        },
        Builtin {
            name: "@enumFromInt",
            signature: "@enumFromInt(integer: anytype) anytype",
            snippet: "@enumFromInt(${1})",
            documentation: "Converts an integer into an enum value, asserting a matching tag exists.",
        },
        Builtin {
            name: "@bitCast",
            signature: "@bitCast(value: anytype) anytype",
            snippet: "@bitCast(${1})",
            documentation: "Reinterprets the bits of a value as another type of the same size.",
        },
        Builtin {
            name: "@ptrCast",
            signature: "@ptrCast(value: anytype) anytype",
            snippet: "@ptrCast(${1})",
            documentation: "Converts between pointer types.",
        },
        Builtin {
            name: "@truncate",
            signature: "@truncate(integer: anytype) anytype",
            snippet: "@truncate(${1})",
            documentation: "Truncates bits from an integer to fit the destination type.",
        },
        Builtin {
            name: "@field",
            signature: "@field(lhs: anytype, comptime field_name: []const u8) anytype",
            snippet: "@field(${1}, \"${2}\")",
            documentation: "Field access by compile-time string name.",
        },
        Builtin {
            name: "@hasField",
            signature: "@hasField(comptime Container: type, comptime name: []const u8) bool",
            snippet: "@hasField(${1:T}, \"${2}\")",
            documentation: "Whether the container has a field with the given name.",
        },
        Builtin {
            name: "@hasDecl",
            signature: "@hasDecl(comptime Container: type, comptime name: []const u8) bool",
            snippet: "@hasDecl(${1:T}, \"${2}\")",
            documentation: "Whether the container has a declaration with the given name.",
        },
        Builtin {
            name: "@tagName",
            signature: "@tagName(value: anytype) [:0]const u8",
            snippet: "@tagName(${1})",
            documentation: "Converts an enum or tagged union value to its tag name string.",
        },
        Builtin {
            name: "@errorName",
            signature: "@errorName(err: anyerror) [:0]const u8",
            snippet: "@errorName(${1})",
            documentation: "The string name of an error value.",
        },
        Builtin {
            name: "@typeName",
            signature: "@typeName(T: type) *const [N:0]u8",
            snippet: "@typeName(${1:T})",
            documentation: "The string name of a type.",
        },
        Builtin {
            name: "@compileError",
            signature: "@compileError(comptime msg: []const u8) noreturn",
            snippet: "@compileError(\"${1}\")",
            documentation: "Emits a compile error with the given message when semantically analyzed.",
        },
        Builtin {
            name: "@compileLog",
            signature: "@compileLog(...) void",
            snippet: "@compileLog(${1})",
            documentation: "Prints the arguments at compile time.",
        },
        Builtin {
            name: "@embedFile",
            signature: "@embedFile(comptime path: []const u8) *const [N:0]u8",
            snippet: "@embedFile(\"${1}\")",
            documentation: "Embeds the contents of a file as a string constant.",
        },
        Builtin {
            name: "@panic",
            signature: "@panic(message: []const u8) noreturn",
            snippet: "@panic(\"${1}\")",
            documentation: "Invokes the panic handler with the given message.",
        },
        Builtin {
            name: "@min",
            signature: "@min(a: T, b: T) T",
            snippet: "@min(${1}, ${2})",
            documentation: "The smaller of two values.",
        },
        Builtin {
            name: "@max",
            signature: "@max(a: T, b: T) T",
            snippet: "@max(${1}, ${2})",
            documentation: "The larger of two values.",
        },
        Builtin {
            name: "@mod",
            signature: "@mod(numerator: T, denominator: T) T",
            snippet: "@mod(${1}, ${2})",
            documentation: "Modulus division; the result has the sign of the denominator.",
        },
        Builtin {
            name: "@rem",
            signature: "@rem(numerator: T, denominator: T) T",
            snippet: "@rem(${1}, ${2})",
            documentation: "Remainder division; the result has the sign of the numerator.",
        },
        Builtin {
            name: "@memcpy",
            signature: "@memcpy(dest, source) void",
            snippet: "@memcpy(${1}, ${2})",
            documentation: "Copies bytes from one memory region to another.",
        },
        Builtin {
            name: "@memset",
            signature: "@memset(dest, elem) void",
            snippet: "@memset(${1}, ${2})",
            documentation: "Sets all elements of a memory region to the given value.",
        },
        Builtin {
            name: "@sqrt",
            signature: "@sqrt(value: anytype) anytype",
            snippet: "@sqrt(${1})",
            documentation: "Square root of a floating point number.",
        },
        Builtin {
            name: "@abs",
            signature: "@abs(value: anytype) anytype",
            snippet: "@abs(${1})",
            documentation: "Absolute value.",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_is_cached_and_contains_import() {
        let first = builtins();
        let second = builtins();
        assert_eq!(first.len(), second.len());
        assert!(first.iter().any(|builtin| builtin.name == "@import"));
    }

    #[test]
    fn every_builtin_has_signature_and_docs() {
        for builtin in builtins() {
            assert!(builtin.name.starts_with('@'));
            assert!(!builtin.signature.is_empty());
            assert!(!builtin.documentation.is_empty());
        }
    }
}
