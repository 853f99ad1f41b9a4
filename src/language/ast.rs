use crate::language::{
    parser,
    span::Span,
    token::{Token, TokenTag},
};

pub type TokenIndex = u32;
pub type NodeIndex = u32;

/// Node 0 is the root and never appears as a child, so 0 doubles as "none"
/// in child slots.
pub const NULL_NODE: NodeIndex = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeTag {
    Root,
    VarDecl,
    FnDecl,
    FnProto,
    Param,
    ContainerDecl,
    ContainerField,
    ErrorSetDecl,
    TestDecl,
    Block,
    Return,
    Defer,
    Break,
    Continue,
    If,
    While,
    For,
    Switch,
    SwitchProng,
    Identifier,
    EnumLiteral,
    ErrorValue,
    StringLiteral,
    CharLiteral,
    NumberLiteral,
    BoolLiteral,
    NullLiteral,
    UndefinedLiteral,
    Call,
    BuiltinCall,
    FieldAccess,
    Deref,
    UnwrapOptional,
    UnOp,
    Try,
    Catch,
    BinOp,
    Grouped,
    PtrType,
    OptionalType,
    SliceType,
    ArrayType,
    ErrorUnionType,
    StructInit,
    FieldInit,
}

/// Child slot layout by tag:
///
/// - `VarDecl`: lhs = type, rhs = init (either may be 0)
/// - `FnDecl`: lhs = proto node, rhs = body block
/// - `FnProto`: lhs = extra range of params, rhs = return type
/// - `Param`: lhs = type (0 for `anytype`)
/// - `ContainerDecl`: lhs = extra range of members
/// - `ContainerField`: lhs = type, rhs = default value
/// - `ErrorSetDecl`: lhs = extra range of name *token* indices
/// - `TestDecl`: lhs = name token + 1 (0 = unnamed), rhs = body
/// - `Block`: lhs = extra range of statements, rhs = label token + 1
/// - `If`/`While`: lhs = condition, rhs = extra index of a 5-slot record
///   `[then, else, payload_token+1, else_payload_token+1, continue_expr]`
/// - `For`: lhs = iterable, rhs = same 5-slot record (payload slots only)
/// - `Switch`: lhs = operand, rhs = extra range of prongs
/// - `SwitchProng`: lhs = extra range of case items (empty = `else`), rhs = body
/// - `Call`: lhs = callee, rhs = extra range of arguments
/// - `BuiltinCall`: lhs = extra range of arguments
/// - `FieldAccess`: lhs = operand, rhs = name *token* index
/// - `Break`: lhs = label token + 1, rhs = value
/// - `Catch`: lhs = operand, rhs = fallback
/// - `ErrorUnionType`: lhs = error set (0 = inferred), rhs = payload
/// - `ArrayType`: lhs = length, rhs = element
/// - `StructInit`: lhs = type expr (0 = anonymous), rhs = extra range of
///   `FieldInit` nodes
/// - single-child tags (`Return`, `Defer`, `Try`, `UnOp`, `Deref`,
///   `UnwrapOptional`, `Grouped`, `PtrType`, `OptionalType`, `SliceType`,
///   `FieldInit`): lhs = child
#[derive(Clone, Copy, Debug)]
pub struct Node {
    pub tag: NodeTag,
    pub main_token: TokenIndex,
    pub lhs: u32,
    pub rhs: u32,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ParseError {
    pub message: String,
    pub token: TokenIndex,
}

/// Parsed file: token array plus flat node array. Indices are stable for the
/// lifetime of the tree; a re-parse produces a fresh `Ast`.
#[derive(Debug)]
pub struct Ast {
    pub tokens: Vec<Token>,
    pub nodes: Vec<Node>,
    pub extra: Vec<u32>,
    pub root_decls: Vec<NodeIndex>,
    pub errors: Vec<ParseError>,
}

/// Structured view of a function prototype.
#[derive(Clone, Debug)]
pub struct FnProto {
    pub fn_token: TokenIndex,
    pub name_token: Option<TokenIndex>,
    pub params: Vec<NodeIndex>,
    pub return_type: NodeIndex,
}

/// Structured view of a `const`/`var` declaration.
#[derive(Clone, Copy, Debug)]
pub struct VarDecl {
    pub mut_token: TokenIndex,
    pub name_token: TokenIndex,
    pub type_node: NodeIndex,
    pub init_node: NodeIndex,
    pub is_const: bool,
    pub is_pub: bool,
}

/// Structured view of a container field (or enum variant).
#[derive(Clone, Copy, Debug)]
pub struct Field {
    pub name_token: TokenIndex,
    pub type_node: NodeIndex,
    pub value_node: NodeIndex,
}

#[derive(Clone, Copy, Debug)]
pub struct PtrType {
    pub child: NodeIndex,
}

/// Payload record for `if`/`while`/`for`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoopData {
    pub body: NodeIndex,
    pub else_node: NodeIndex,
    pub payload_token: Option<TokenIndex>,
    pub index_payload_token: Option<TokenIndex>,
    pub continue_expr: NodeIndex,
}

impl Ast {
    pub fn parse(source: &str) -> Ast {
        parser::parse(source)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn token_tag(&self, index: TokenIndex) -> TokenTag {
        self.tokens[index as usize].tag
    }

    pub fn token_span(&self, index: TokenIndex) -> Span {
        self.tokens[index as usize].span
    }

    pub fn token_source<'s>(&self, source: &'s str, index: TokenIndex) -> &'s str {
        let span = self.token_span(index);
        &source[span.start.min(source.len())..span.end.min(source.len())]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index as usize]
    }

    pub fn node_tag(&self, index: NodeIndex) -> NodeTag {
        self.nodes[index as usize].tag
    }

    pub fn node_span(&self, index: NodeIndex) -> Span {
        self.nodes[index as usize].span
    }

    pub fn root_decls(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.root_decls.iter().copied()
    }

    /// Length-prefixed slice stored in `extra`.
    pub fn extra_range(&self, index: u32) -> &[u32] {
        if index as usize >= self.extra.len() {
            return &[];
        }
        let len = self.extra[index as usize] as usize;
        let start = index as usize + 1;
        &self.extra[start..(start + len).min(self.extra.len())]
    }

    pub fn next_non_trivia(&self, index: TokenIndex) -> TokenIndex {
        let mut i = index as usize + 1;
        while i < self.tokens.len() && self.tokens[i].tag.is_trivia() {
            i += 1;
        }
        (i.min(self.tokens.len() - 1)) as TokenIndex
    }

    /// Token whose span contains `offset`, preferring identifiers whose end
    /// equals the offset (cursor sitting just past a word).
    pub fn token_at_offset(&self, offset: usize) -> Option<TokenIndex> {
        for (i, token) in self.tokens.iter().enumerate() {
            if token.span.contains(offset) {
                return Some(i as TokenIndex);
            }
            if token.span.end == offset && token.tag == TokenTag::Identifier {
                return Some(i as TokenIndex);
            }
        }
        None
    }

    /// First token starting at or after `offset`.
    pub fn first_token_at(&self, offset: usize) -> Option<TokenIndex> {
        self.tokens
            .iter()
            .position(|token| token.span.start >= offset)
            .map(|i| i as TokenIndex)
    }

    pub fn fn_proto(&self, index: NodeIndex) -> Option<FnProto> {
        let node = self.node(index);
        let proto_index = match node.tag {
            NodeTag::FnProto => index,
            NodeTag::FnDecl => node.lhs,
            _ => return None,
        };
        let proto = self.node(proto_index);
        let name_candidate = self.next_non_trivia(proto.main_token);
        let name_token =
            (self.token_tag(name_candidate) == TokenTag::Identifier).then_some(name_candidate);
        Some(FnProto {
            fn_token: proto.main_token,
            name_token,
            params: self.extra_range(proto.lhs).to_vec(),
            return_type: proto.rhs,
        })
    }

    pub fn var_decl(&self, index: NodeIndex) -> Option<VarDecl> {
        let node = self.node(index);
        if node.tag != NodeTag::VarDecl {
            return None;
        }
        let name_token = self.next_non_trivia(node.main_token);
        if self.token_tag(name_token) != TokenTag::Identifier {
            return None;
        }
        let is_pub = node.main_token > 0
            && self.tokens[..node.main_token as usize]
                .iter()
                .rev()
                .find(|token| !token.tag.is_trivia())
                .is_some_and(|token| token.tag == TokenTag::KeywordPub);
        Some(VarDecl {
            mut_token: node.main_token,
            name_token,
            type_node: node.lhs,
            init_node: node.rhs,
            is_const: self.token_tag(node.main_token) == TokenTag::KeywordConst,
            is_pub,
        })
    }

    pub fn container_field(&self, index: NodeIndex) -> Option<Field> {
        let node = self.node(index);
        if node.tag != NodeTag::ContainerField {
            return None;
        }
        Some(Field {
            name_token: node.main_token,
            type_node: node.lhs,
            value_node: node.rhs,
        })
    }

    pub fn ptr_type(&self, index: NodeIndex) -> Option<PtrType> {
        let node = self.node(index);
        if node.tag != NodeTag::PtrType {
            return None;
        }
        Some(PtrType { child: node.lhs })
    }

    pub fn container_members(&self, index: NodeIndex) -> &[u32] {
        match self.node_tag(index) {
            NodeTag::ContainerDecl => self.extra_range(self.node(index).lhs),
            NodeTag::Root => &[],
            _ => &[],
        }
    }

    pub fn loop_data(&self, index: NodeIndex) -> LoopData {
        let node = self.node(index);
        if !matches!(node.tag, NodeTag::If | NodeTag::While | NodeTag::For) {
            return LoopData::default();
        }
        let base = node.rhs as usize;
        if base + 5 > self.extra.len() {
            return LoopData::default();
        }
        let token_or_none = |raw: u32| (raw != 0).then(|| raw - 1);
        LoopData {
            body: self.extra[base],
            else_node: self.extra[base + 1],
            payload_token: token_or_none(self.extra[base + 2]),
            index_payload_token: token_or_none(self.extra[base + 3]),
            continue_expr: self.extra[base + 4],
        }
    }

    /// `|name|` capture token of a `switch` prong or `catch`, if present.
    pub fn payload_token_after(&self, token: TokenIndex) -> Option<TokenIndex> {
        let pipe = self.next_non_trivia(token);
        if self.token_tag(pipe) != TokenTag::Pipe {
            return None;
        }
        let name = self.next_non_trivia(pipe);
        (self.token_tag(name) == TokenTag::Identifier).then_some(name)
    }

    /// Child nodes in source order. Token-index slots (field names, labels,
    /// error set members) are not nodes and are skipped.
    pub fn children(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let node = self.node(index);
        let mut out = Vec::new();
        let mut push = |candidate: u32, out: &mut Vec<NodeIndex>| {
            if candidate != NULL_NODE {
                out.push(candidate);
            }
        };
        match node.tag {
            NodeTag::Root => out.extend(self.root_decls.iter().copied()),
            NodeTag::VarDecl
            | NodeTag::ContainerField
            | NodeTag::BinOp
            | NodeTag::Catch
            | NodeTag::ErrorUnionType
            | NodeTag::ArrayType
            | NodeTag::FnDecl => {
                push(node.lhs, &mut out);
                push(node.rhs, &mut out);
            }
            NodeTag::FnProto => {
                out.extend(self.extra_range(node.lhs).iter().copied());
                push(node.rhs, &mut out);
            }
            NodeTag::Param
            | NodeTag::Return
            | NodeTag::Defer
            | NodeTag::Try
            | NodeTag::UnOp
            | NodeTag::Deref
            | NodeTag::UnwrapOptional
            | NodeTag::Grouped
            | NodeTag::PtrType
            | NodeTag::OptionalType
            | NodeTag::SliceType
            | NodeTag::FieldAccess
            | NodeTag::FieldInit => push(node.lhs, &mut out),
            NodeTag::ContainerDecl => out.extend(self.extra_range(node.lhs).iter().copied()),
            NodeTag::TestDecl => push(node.rhs, &mut out),
            NodeTag::Block => out.extend(self.extra_range(node.lhs).iter().copied()),
            NodeTag::Break => push(node.rhs, &mut out),
            NodeTag::If | NodeTag::While | NodeTag::For => {
                push(node.lhs, &mut out);
                let data = self.loop_data(index);
                push(data.body, &mut out);
                push(data.else_node, &mut out);
                push(data.continue_expr, &mut out);
            }
            NodeTag::Switch => {
                push(node.lhs, &mut out);
                out.extend(self.extra_range(node.rhs).iter().copied());
            }
            NodeTag::SwitchProng => {
                out.extend(self.extra_range(node.lhs).iter().copied());
                push(node.rhs, &mut out);
            }
            NodeTag::Call => {
                push(node.lhs, &mut out);
                out.extend(self.extra_range(node.rhs).iter().copied());
            }
            NodeTag::BuiltinCall => out.extend(self.extra_range(node.lhs).iter().copied()),
            NodeTag::StructInit => {
                push(node.lhs, &mut out);
                out.extend(self.extra_range(node.rhs).iter().copied());
            }
            NodeTag::Identifier
            | NodeTag::EnumLiteral
            | NodeTag::ErrorValue
            | NodeTag::StringLiteral
            | NodeTag::CharLiteral
            | NodeTag::NumberLiteral
            | NodeTag::BoolLiteral
            | NodeTag::NullLiteral
            | NodeTag::UndefinedLiteral
            | NodeTag::Continue
            | NodeTag::ErrorSetDecl => {}
        }
        out
    }

    /// Label token of a labeled block or loop, if any.
    pub fn label_token(&self, index: NodeIndex) -> Option<TokenIndex> {
        let node = self.node(index);
        match node.tag {
            NodeTag::Block => (node.rhs != 0).then(|| node.rhs - 1),
            NodeTag::While | NodeTag::For => {
                let first = self.first_token_at(node.span.start)?;
                if self.token_tag(first) == TokenTag::Identifier
                    && self.token_tag(self.next_non_trivia(first)) == TokenTag::Colon
                {
                    Some(first)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Doc comment token run immediately preceding `first_token`, in source
    /// order. Any other token (including a plain comment) terminates the run.
    pub fn doc_comment_tokens(&self, first_token: TokenIndex) -> Vec<TokenIndex> {
        let mut run = Vec::new();
        let mut i = first_token as usize;
        while i > 0 {
            i -= 1;
            if self.tokens[i].tag == TokenTag::DocComment {
                run.push(i as TokenIndex);
            } else {
                break;
            }
        }
        run.reverse();
        run
    }

    pub fn render_parse_error(&self, error: &ParseError, source: &str) -> String {
        let found = if (error.token as usize) < self.tokens.len() {
            let tag = self.token_tag(error.token);
            match tag {
                TokenTag::Identifier => {
                    format!("'{}'", self.token_source(source, error.token))
                }
                other => other.describe().to_string(),
            }
        } else {
            "end of file".to_string()
        };
        format!("{}, found {}", error.message, found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_proto_view_exposes_name_and_params() {
        let ast = Ast::parse("pub fn add(a: i32, b: i32) i32 { return a + b; }");
        assert!(ast.errors.is_empty(), "{:?}", ast.errors);
        let decl = ast.root_decls[0];
        assert_eq!(ast.node_tag(decl), NodeTag::FnDecl);
        let proto = ast.fn_proto(decl).expect("fn proto");
        assert_eq!(proto.params.len(), 2);
        assert!(proto.name_token.is_some());
        assert_ne!(proto.return_type, NULL_NODE);
    }

    #[test]
    fn var_decl_view_reads_pub_and_mutability() {
        let source = "pub const X = 1;\nvar y: i32 = 2;";
        let ast = Ast::parse(source);
        assert!(ast.errors.is_empty(), "{:?}", ast.errors);
        let x = ast.var_decl(ast.root_decls[0]).expect("x");
        assert!(x.is_const);
        assert!(x.is_pub);
        assert_eq!(ast.token_source(source, x.name_token), "X");
        let y = ast.var_decl(ast.root_decls[1]).expect("y");
        assert!(!y.is_const);
        assert!(!y.is_pub);
        assert_ne!(y.type_node, NULL_NODE);
    }

    #[test]
    fn doc_comments_attach_to_following_declaration() {
        let source = "/// first\n/// second\nconst x = 1;\n// gap\n/// lone\nconst y = 2;";
        let ast = Ast::parse(source);
        let x = ast.node(ast.root_decls[0]);
        let first = ast.first_token_at(x.span.start).unwrap();
        let run = ast.doc_comment_tokens(first);
        assert_eq!(run.len(), 2);
        assert_eq!(ast.token_source(source, run[0]), "/// first");
    }

    #[test]
    fn render_parse_error_names_found_token() {
        let source = "fn (";
        let ast = Ast::parse(source);
        assert!(!ast.errors.is_empty());
        let rendered = ast.render_parse_error(&ast.errors[0], source);
        assert!(rendered.contains("expected"), "{rendered}");
    }
}
