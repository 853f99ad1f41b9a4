use crate::language::{
    ast::{Ast, NodeIndex, NodeTag, TokenIndex, NULL_NODE},
    lexer,
    span::Span,
    token::TokenTag,
};
use crate::lsp::store::{DocumentStore, Handle};
use tower_lsp_server::lsp_types::Uri;

/// Alias chains (`const A = B;` across files) are followed at most this far
/// before resolution gives up, so cycles terminate.
pub const MAX_ALIAS_DEPTH: usize = 32;

/// Bound on recursive type resolution.
const MAX_TYPE_DEPTH: usize = 32;

/// A resolved symbol. Equality is the identity references and rename rely
/// on: owning URI, variant, and anchor node/token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub uri: Uri,
    pub kind: DeclKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeclKind {
    /// Top-level or container member (var decl, fn decl, field). Node 0 is
    /// the file's root container (the target of a bare `@import`).
    AstNode(NodeIndex),
    Param {
        fn_node: NodeIndex,
        param: NodeIndex,
    },
    /// `if (opt) |value|` / `while (opt) |value|`
    PointerPayload {
        token: TokenIndex,
        condition: NodeIndex,
    },
    /// `for (items) |item|`
    ArrayPayload {
        token: TokenIndex,
        array_expr: NodeIndex,
    },
    /// `for (items) |_, i|`
    ArrayIndex { token: TokenIndex },
    /// `.variant => |payload|`
    SwitchPayload {
        token: TokenIndex,
        operand: NodeIndex,
    },
    Label {
        token: TokenIndex,
        block: NodeIndex,
    },
}

/// A resolved type plus the handle its node lives in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeWithHandle {
    pub data: TypeData,
    /// True when the expression *is* a type (`const P = struct {...}`; the
    /// identifier `P`), false for instances of it.
    pub is_type_val: bool,
    pub uri: Uri,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeData {
    /// Element type node; 0 means `u8` (string literals).
    Slice(NodeIndex),
    /// Payload type node.
    ErrorUnion(NodeIndex),
    /// Pointee type node.
    Pointer(NodeIndex),
    /// Any other type-carrying node (containers, optionals, error sets...).
    Other(NodeIndex),
    Primitive(String),
}

impl TypeWithHandle {
    fn type_val(data: TypeData, uri: Uri) -> Self {
        Self {
            data,
            is_type_val: true,
            uri,
        }
    }

    fn instance(mut self) -> Self {
        self.is_type_val = false;
        self
    }

    pub fn container_node(&self) -> Option<NodeIndex> {
        match self.data {
            TypeData::Other(node) => Some(node),
            _ => None,
        }
    }
}

/// Result of resolving a dotted chain: the declared type, and the type after
/// unwrapping one `?`/`!` level, when that applies.
#[derive(Clone, Debug)]
pub struct FieldAccessReturn {
    pub original: TypeWithHandle,
    pub unwrapped: Option<TypeWithHandle>,
}

// ----- scopes -----

#[derive(Debug, Default)]
struct Scope {
    decls: Vec<(String, Declaration)>,
}

fn member_scope(handle: &Handle, members: &[u32]) -> Scope {
    let tree = &handle.tree;
    let mut scope = Scope::default();
    for &member in members {
        match tree.node_tag(member) {
            NodeTag::VarDecl => {
                if let Some(decl) = tree.var_decl(member) {
                    scope.decls.push((
                        tree.token_source(&handle.text, decl.name_token).to_string(),
                        Declaration {
                            uri: handle.uri.clone(),
                            kind: DeclKind::AstNode(member),
                        },
                    ));
                }
            }
            NodeTag::FnDecl => {
                if let Some(proto) = tree.fn_proto(member) {
                    if let Some(name_token) = proto.name_token {
                        scope.decls.push((
                            tree.token_source(&handle.text, name_token).to_string(),
                            Declaration {
                                uri: handle.uri.clone(),
                                kind: DeclKind::AstNode(member),
                            },
                        ));
                    }
                }
            }
            _ => {}
        }
    }
    scope
}

fn collect_scopes(handle: &Handle, offset: usize) -> Vec<Scope> {
    let tree = &handle.tree;
    let mut scopes = vec![member_scope(handle, &tree.root_decls)];
    let mut current: Option<NodeIndex> = tree
        .root_decls()
        .find(|&decl| tree.node_span(decl).contains(offset));
    while let Some(node) = current.take() {
        match tree.node_tag(node) {
            NodeTag::FnDecl => {
                let mut scope = Scope::default();
                if let Some(proto) = tree.fn_proto(node) {
                    for &param in &proto.params {
                        let name_token = tree.node(param).main_token;
                        scope.decls.push((
                            tree.token_source(&handle.text, name_token).to_string(),
                            Declaration {
                                uri: handle.uri.clone(),
                                kind: DeclKind::Param {
                                    fn_node: node,
                                    param,
                                },
                            },
                        ));
                    }
                }
                scopes.push(scope);
            }
            NodeTag::ContainerDecl => {
                scopes.push(member_scope(handle, tree.container_members(node)));
            }
            NodeTag::Block => {
                let mut scope = Scope::default();
                for &stmt in tree.extra_range(tree.node(node).lhs) {
                    if tree.node_tag(stmt) != NodeTag::VarDecl {
                        continue;
                    }
                    let Some(decl) = tree.var_decl(stmt) else {
                        continue;
                    };
                    // declaration-before-use inside blocks
                    if tree.token_span(decl.name_token).start < offset {
                        scope.decls.push((
                            tree.token_source(&handle.text, decl.name_token).to_string(),
                            Declaration {
                                uri: handle.uri.clone(),
                                kind: DeclKind::AstNode(stmt),
                            },
                        ));
                    }
                }
                scopes.push(scope);
            }
            NodeTag::If | NodeTag::While => {
                let data = tree.loop_data(node);
                let mut scope = Scope::default();
                let in_body =
                    data.body != NULL_NODE && tree.node_span(data.body).contains(offset);
                let in_else =
                    data.else_node != NULL_NODE && tree.node_span(data.else_node).contains(offset);
                let payload = if in_body {
                    data.payload_token
                } else if in_else {
                    // the `else |err|` capture shares the slot layout
                    data.index_payload_token
                } else {
                    None
                };
                if let Some(token) = payload {
                    scope.decls.push((
                        tree.token_source(&handle.text, token).to_string(),
                        Declaration {
                            uri: handle.uri.clone(),
                            kind: DeclKind::PointerPayload {
                                token,
                                condition: tree.node(node).lhs,
                            },
                        },
                    ));
                }
                scopes.push(scope);
            }
            NodeTag::For => {
                let data = tree.loop_data(node);
                let mut scope = Scope::default();
                if data.body != NULL_NODE && tree.node_span(data.body).contains(offset) {
                    if let Some(token) = data.payload_token {
                        scope.decls.push((
                            tree.token_source(&handle.text, token).to_string(),
                            Declaration {
                                uri: handle.uri.clone(),
                                kind: DeclKind::ArrayPayload {
                                    token,
                                    array_expr: tree.node(node).lhs,
                                },
                            },
                        ));
                    }
                    if let Some(token) = data.index_payload_token {
                        scope.decls.push((
                            tree.token_source(&handle.text, token).to_string(),
                            Declaration {
                                uri: handle.uri.clone(),
                                kind: DeclKind::ArrayIndex { token },
                            },
                        ));
                    }
                }
                scopes.push(scope);
            }
            NodeTag::SwitchProng => {
                let mut scope = Scope::default();
                let arrow = tree.node(node).main_token;
                if let Some(token) = tree.payload_token_after(arrow) {
                    let operand = switch_operand_of_prong(tree, node);
                    scope.decls.push((
                        tree.token_source(&handle.text, token).to_string(),
                        Declaration {
                            uri: handle.uri.clone(),
                            kind: DeclKind::SwitchPayload {
                                token,
                                operand,
                            },
                        },
                    ));
                }
                scopes.push(scope);
            }
            _ => {}
        }
        current = tree
            .children(node)
            .into_iter()
            .find(|&child| tree.node_span(child).contains(offset));
    }
    scopes
}

fn switch_operand_of_prong(tree: &Ast, prong: NodeIndex) -> NodeIndex {
    for index in 0..tree.node_count() as NodeIndex {
        if tree.node_tag(index) == NodeTag::Switch
            && tree
                .extra_range(tree.node(index).rhs)
                .contains(&prong)
        {
            return tree.node(index).lhs;
        }
    }
    NULL_NODE
}

// ----- symbol lookup -----

/// Innermost-scope-first name lookup at a position. Shadowing honored; the
/// file's top-level declarations (imports included, since an import is just
/// a `const` alias) form the outermost scope.
pub fn lookup_symbol_global(
    store: &DocumentStore,
    uri: &Uri,
    name: &str,
    offset: usize,
) -> Option<Declaration> {
    let handle = store.get_handle(uri)?;
    let scopes = collect_scopes(handle, offset);
    for scope in scopes.iter().rev() {
        if let Some((_, decl)) = scope
            .decls
            .iter()
            .rev()
            .find(|(decl_name, _)| decl_name == name)
        {
            return Some(decl.clone());
        }
    }
    None
}

/// Member lookup inside a container (or a file's root container, node 0).
/// With `instance` set, type-only members (declarations) are omitted and
/// only instance fields match; without it both match.
pub fn lookup_symbol_container(
    store: &DocumentStore,
    container_uri: &Uri,
    container_node: NodeIndex,
    name: &str,
    instance: bool,
) -> Option<Declaration> {
    let handle = store.get_handle(container_uri)?;
    let tree = &handle.tree;
    let members: Vec<u32> = if container_node == NULL_NODE {
        tree.root_decls.clone()
    } else {
        tree.container_members(container_node).to_vec()
    };
    for &member in &members {
        let name_token = match tree.node_tag(member) {
            NodeTag::ContainerField => tree.container_field(member).map(|field| field.name_token),
            NodeTag::VarDecl if !instance => tree.var_decl(member).map(|decl| decl.name_token),
            NodeTag::FnDecl if !instance => {
                tree.fn_proto(member).and_then(|proto| proto.name_token)
            }
            _ => None,
        };
        if let Some(name_token) = name_token {
            if tree.token_source(&handle.text, name_token) == name {
                return Some(Declaration {
                    uri: container_uri.clone(),
                    kind: DeclKind::AstNode(member),
                });
            }
        }
    }
    None
}

/// Enclosing block/loop label of the given name.
pub fn lookup_label(
    store: &DocumentStore,
    uri: &Uri,
    name: &str,
    offset: usize,
) -> Option<Declaration> {
    visible_labels(store, uri, offset)
        .into_iter()
        .find(|(label_name, _)| label_name == name)
        .map(|(_, decl)| decl)
}

/// Labels on blocks and loops enclosing the position, innermost first.
pub fn visible_labels(
    store: &DocumentStore,
    uri: &Uri,
    offset: usize,
) -> Vec<(String, Declaration)> {
    let Some(handle) = store.get_handle(uri) else {
        return Vec::new();
    };
    let tree = &handle.tree;
    let mut labels = Vec::new();
    let mut current: Option<NodeIndex> = tree
        .root_decls()
        .find(|&decl| tree.node_span(decl).contains(offset));
    while let Some(node) = current.take() {
        if let Some(token) = tree.label_token(node) {
            labels.push((
                tree.token_source(&handle.text, token).to_string(),
                Declaration {
                    uri: uri.clone(),
                    kind: DeclKind::Label { token, block: node },
                },
            ));
        }
        current = tree
            .children(node)
            .into_iter()
            .find(|&child| tree.node_span(child).contains(offset));
    }
    labels.reverse();
    labels
}

/// Everything an identifier at the position could resolve to, innermost
/// first with shadowed names removed. Drives scope completion.
pub fn visible_declarations(
    store: &DocumentStore,
    uri: &Uri,
    offset: usize,
) -> Vec<(String, Declaration)> {
    let Some(handle) = store.get_handle(uri) else {
        return Vec::new();
    };
    let scopes = collect_scopes(handle, offset);
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for scope in scopes.iter().rev() {
        for (name, decl) in scope.decls.iter().rev() {
            if seen.insert(name.clone()) {
                out.push((name.clone(), decl.clone()));
            }
        }
    }
    out
}

// ----- declarations: names and locations -----

pub fn decl_name_token(store: &DocumentStore, decl: &Declaration) -> Option<TokenIndex> {
    let handle = store.get_handle(&decl.uri)?;
    let tree = &handle.tree;
    match &decl.kind {
        DeclKind::AstNode(node) => match tree.node_tag(*node) {
            NodeTag::Root => None,
            NodeTag::VarDecl => tree.var_decl(*node).map(|decl| decl.name_token),
            NodeTag::FnDecl | NodeTag::FnProto => tree.fn_proto(*node)?.name_token,
            NodeTag::ContainerField => tree.container_field(*node).map(|field| field.name_token),
            _ => None,
        },
        DeclKind::Param { param, .. } => Some(tree.node(*param).main_token),
        DeclKind::PointerPayload { token, .. }
        | DeclKind::ArrayPayload { token, .. }
        | DeclKind::ArrayIndex { token }
        | DeclKind::SwitchPayload { token, .. }
        | DeclKind::Label { token, .. } => Some(*token),
    }
}

/// Byte span of the declaration's name token; the file start for a root
/// container.
pub fn decl_name_span(store: &DocumentStore, decl: &Declaration) -> Option<Span> {
    if let DeclKind::AstNode(NULL_NODE) = decl.kind {
        return Some(Span::new(0, 0));
    }
    let token = decl_name_token(store, decl)?;
    let handle = store.get_handle(&decl.uri)?;
    Some(handle.tree.token_span(token))
}

pub fn decl_name(store: &DocumentStore, decl: &Declaration) -> Option<String> {
    let token = decl_name_token(store, decl)?;
    let handle = store.get_handle(&decl.uri)?;
    Some(handle.tree.token_source(&handle.text, token).to_string())
}

// ----- alias resolution -----

/// Final target of an alias declaration (`const Foo = Bar;`,
/// `const Foo = @import("...").Bar;`). `None` when the declaration is not an
/// alias, or when a chain exceeds the depth cap (cycles).
pub fn resolve_alias(store: &DocumentStore, decl: &Declaration) -> Option<Declaration> {
    let mut current = decl.clone();
    let mut followed = false;
    for _ in 0..MAX_ALIAS_DEPTH {
        match alias_target(store, &current) {
            Some(next) => {
                followed = true;
                current = next;
            }
            None => return followed.then_some(current),
        }
    }
    None
}

/// One alias step: the declaration the initializer re-exports, if the
/// initializer is a pure re-export expression.
fn alias_target(store: &DocumentStore, decl: &Declaration) -> Option<Declaration> {
    let DeclKind::AstNode(node) = decl.kind else {
        return None;
    };
    let handle = store.get_handle(&decl.uri)?;
    let tree = &handle.tree;
    let var = tree.var_decl(node)?;
    if !var.is_const || var.init_node == NULL_NODE || var.type_node != NULL_NODE {
        return None;
    }
    resolve_expr_to_decl(store, &decl.uri, var.init_node, 0)
}

/// Declaration named by a re-export-shaped expression: an identifier, an
/// `@import`, or a field-access chain over those.
fn resolve_expr_to_decl(
    store: &DocumentStore,
    uri: &Uri,
    node: NodeIndex,
    depth: usize,
) -> Option<Declaration> {
    if depth > MAX_ALIAS_DEPTH {
        return None;
    }
    let handle = store.get_handle(uri)?;
    let tree = &handle.tree;
    match tree.node_tag(node) {
        NodeTag::Identifier => {
            let token = tree.node(node).main_token;
            let name = tree.token_source(&handle.text, token);
            lookup_symbol_global(store, uri, name, tree.token_span(token).start)
        }
        NodeTag::BuiltinCall => {
            let import = import_target(store, handle, node)?;
            Some(Declaration {
                uri: import,
                kind: DeclKind::AstNode(NULL_NODE),
            })
        }
        NodeTag::FieldAccess => {
            let base = tree.node(node).lhs;
            let base_ty = resolve_type(store, uri, base, depth + 1)?;
            let name_token = tree.node(node).rhs as TokenIndex;
            let name = tree.token_source(&handle.text, name_token);
            let container = member_container(store, &base_ty)?;
            let decl = lookup_symbol_container(
                store,
                &container.uri,
                container.node,
                name,
                !base_ty.is_type_val,
            )?;
            Some(decl)
        }
        NodeTag::Grouped => resolve_expr_to_decl(store, uri, tree.node(node).lhs, depth + 1),
        _ => None,
    }
}

/// Target URI of an `@import("...")` call.
fn import_target(store: &DocumentStore, handle: &Handle, node: NodeIndex) -> Option<Uri> {
    let tree = &handle.tree;
    if tree.node_tag(node) != NodeTag::BuiltinCall {
        return None;
    }
    if tree.token_source(&handle.text, tree.node(node).main_token) != "@import" {
        return None;
    }
    let args = tree.extra_range(tree.node(node).lhs);
    let &arg = args.first()?;
    if tree.node_tag(arg) != NodeTag::StringLiteral {
        return None;
    }
    let raw = tree.token_source(&handle.text, tree.node(arg).main_token);
    store.resolve_import(handle, raw.trim_matches('"'))
}

// ----- type resolution -----

struct ContainerRef {
    uri: Uri,
    node: NodeIndex,
}

/// Container to search for a member access on a value of type `ty`,
/// unwrapping one pointer/optional level. Named types are chased through
/// resolution until a container (or nothing) appears.
fn member_container(store: &DocumentStore, ty: &TypeWithHandle) -> Option<ContainerRef> {
    let mut current = ty.clone();
    for _ in 0..MAX_TYPE_DEPTH {
        let handle = store.get_handle(&current.uri)?;
        let tree = &handle.tree;
        let node = match current.data {
            TypeData::Other(node) => node,
            TypeData::Pointer(pointee) => pointee,
            _ => return None,
        };
        let node = unwrap_type_node(tree, node);
        match tree.node_tag(node) {
            NodeTag::Root | NodeTag::ContainerDecl => {
                return Some(ContainerRef {
                    uri: current.uri.clone(),
                    node,
                });
            }
            NodeTag::Identifier | NodeTag::FieldAccess | NodeTag::Call | NodeTag::BuiltinCall => {
                let resolved = resolve_type(store, &current.uri, node, 0)?;
                if resolved == current {
                    return None;
                }
                current = resolved;
            }
            _ => return None,
        }
    }
    None
}

/// Container (file root or container declaration) behind a type, if any.
/// Pointer/optional wrappers are unwrapped on the way.
pub fn container_of_type(
    store: &DocumentStore,
    ty: &TypeWithHandle,
) -> Option<(Uri, NodeIndex)> {
    member_container(store, ty).map(|container| (container.uri, container.node))
}

/// Whether the type is a single-item pointer.
pub fn is_pointer_type(store: &DocumentStore, ty: &TypeWithHandle) -> bool {
    match ty.data {
        TypeData::Pointer(_) => true,
        TypeData::Other(node) => store
            .get_handle(&ty.uri)
            .is_some_and(|handle| handle.tree.node_tag(node) == NodeTag::PtrType),
        _ => false,
    }
}

/// Whether the type is an optional.
pub fn is_optional_type(store: &DocumentStore, ty: &TypeWithHandle) -> bool {
    match ty.data {
        TypeData::Other(node) => store
            .get_handle(&ty.uri)
            .is_some_and(|handle| handle.tree.node_tag(node) == NodeTag::OptionalType),
        _ => false,
    }
}

/// Whether the container node is an `enum` declaration.
pub fn is_enum_container(store: &DocumentStore, uri: &Uri, node: NodeIndex) -> bool {
    let Some(handle) = store.get_handle(uri) else {
        return false;
    };
    let tree = &handle.tree;
    node != NULL_NODE
        && tree.node_tag(node) == NodeTag::ContainerDecl
        && tree.token_tag(tree.node(node).main_token) == TokenTag::KeywordEnum
}

/// Peel pointer/optional syntax nodes one level at a time.
fn unwrap_type_node(tree: &Ast, node: NodeIndex) -> NodeIndex {
    match tree.node_tag(node) {
        NodeTag::PtrType | NodeTag::OptionalType | NodeTag::Grouped => {
            unwrap_type_node(tree, tree.node(node).lhs)
        }
        _ => node,
    }
}

/// Whether the name is a language primitive type (`i32`, `bool`, `type`...).
pub fn is_primitive_name(name: &str) -> bool {
    if name.len() > 1 {
        let (head, rest) = name.split_at(1);
        if matches!(head, "i" | "u") && rest.bytes().all(|b| b.is_ascii_digit()) {
            return true;
        }
    }
    matches!(
        name,
        "usize"
            | "isize"
            | "f16"
            | "f32"
            | "f64"
            | "f128"
            | "bool"
            | "void"
            | "type"
            | "anyerror"
            | "noreturn"
            | "anyopaque"
            | "comptime_int"
            | "comptime_float"
            | "c_int"
            | "c_char"
    )
}

/// Declared type of an expression node.
pub fn resolve_type_of_node(
    store: &DocumentStore,
    uri: &Uri,
    node: NodeIndex,
) -> Option<TypeWithHandle> {
    resolve_type(store, uri, node, 0)
}

fn resolve_type(
    store: &DocumentStore,
    uri: &Uri,
    node: NodeIndex,
    depth: usize,
) -> Option<TypeWithHandle> {
    if depth > MAX_TYPE_DEPTH || node == NULL_NODE {
        return None;
    }
    let handle = store.get_handle(uri)?;
    let tree = &handle.tree;
    match tree.node_tag(node) {
        NodeTag::Identifier => {
            let token = tree.node(node).main_token;
            let name = tree.token_source(&handle.text, token);
            if is_primitive_name(name) {
                return Some(TypeWithHandle::type_val(
                    TypeData::Primitive(name.to_string()),
                    uri.clone(),
                ));
            }
            let decl = lookup_symbol_global(store, uri, name, tree.token_span(token).start)?;
            resolve_decl_type(store, &decl, depth + 1)
        }
        NodeTag::FieldAccess => {
            let base_ty = resolve_type(store, uri, tree.node(node).lhs, depth + 1)?;
            let name_token = tree.node(node).rhs as TokenIndex;
            let name = tree.token_source(&handle.text, name_token).to_string();
            resolve_member_type(store, &base_ty, &name, depth + 1)
        }
        NodeTag::Call => {
            let callee = tree.node(node).lhs;
            let decl = resolve_expr_to_decl(store, uri, callee, depth + 1)?;
            let decl = resolve_alias(store, &decl).unwrap_or(decl);
            resolve_call_return(store, &decl, depth + 1)
        }
        NodeTag::BuiltinCall => {
            let name = tree.token_source(&handle.text, tree.node(node).main_token);
            match name {
                "@import" => {
                    let target = import_target(store, handle, node)?;
                    Some(TypeWithHandle::type_val(TypeData::Other(NULL_NODE), target))
                }
                "@This" => {
                    let container = enclosing_container(tree, tree.node_span(node).start);
                    Some(TypeWithHandle::type_val(
                        TypeData::Other(container),
                        uri.clone(),
                    ))
                }
                _ => None,
            }
        }
        NodeTag::StringLiteral => Some(TypeWithHandle {
            data: TypeData::Slice(NULL_NODE),
            is_type_val: false,
            uri: uri.clone(),
        }),
        NodeTag::CharLiteral => Some(TypeWithHandle {
            data: TypeData::Primitive("comptime_int".into()),
            is_type_val: false,
            uri: uri.clone(),
        }),
        NodeTag::NumberLiteral => {
            let source = tree.token_source(&handle.text, tree.node(node).main_token);
            let name = if source.contains('.') {
                "comptime_float"
            } else {
                "comptime_int"
            };
            Some(TypeWithHandle {
                data: TypeData::Primitive(name.into()),
                is_type_val: false,
                uri: uri.clone(),
            })
        }
        NodeTag::BoolLiteral => Some(TypeWithHandle {
            data: TypeData::Primitive("bool".into()),
            is_type_val: false,
            uri: uri.clone(),
        }),
        NodeTag::ContainerDecl | NodeTag::ErrorSetDecl => {
            Some(TypeWithHandle::type_val(TypeData::Other(node), uri.clone()))
        }
        NodeTag::PtrType => Some(TypeWithHandle::type_val(
            TypeData::Pointer(tree.node(node).lhs),
            uri.clone(),
        )),
        NodeTag::SliceType => Some(TypeWithHandle::type_val(
            TypeData::Slice(tree.node(node).lhs),
            uri.clone(),
        )),
        NodeTag::OptionalType | NodeTag::ArrayType => {
            Some(TypeWithHandle::type_val(TypeData::Other(node), uri.clone()))
        }
        NodeTag::ErrorUnionType => Some(TypeWithHandle::type_val(
            TypeData::ErrorUnion(tree.node(node).rhs),
            uri.clone(),
        )),
        NodeTag::Try | NodeTag::Catch => {
            let inner = resolve_type(store, uri, tree.node(node).lhs, depth + 1)?;
            unwrap_error_union(store, &inner, depth + 1)
        }
        NodeTag::Grouped => resolve_type(store, uri, tree.node(node).lhs, depth + 1),
        NodeTag::Deref => {
            let inner = resolve_type(store, uri, tree.node(node).lhs, depth + 1)?;
            deref_pointer(store, &inner, depth + 1)
        }
        NodeTag::UnwrapOptional => {
            let inner = resolve_type(store, uri, tree.node(node).lhs, depth + 1)?;
            unwrap_optional(store, &inner, depth + 1)
        }
        // `&x` and the other prefix operators keep the operand type as far
        // as member access is concerned
        NodeTag::UnOp => resolve_type(store, uri, tree.node(node).lhs, depth + 1),
        NodeTag::BinOp => {
            let op = tree.token_tag(tree.node(node).main_token);
            match op {
                TokenTag::KeywordOrelse => {
                    let inner = resolve_type(store, uri, tree.node(node).lhs, depth + 1)?;
                    unwrap_optional(store, &inner, depth + 1)
                }
                TokenTag::LBracket => {
                    let inner = resolve_type(store, uri, tree.node(node).lhs, depth + 1)?;
                    element_type(store, &inner, depth + 1)
                }
                _ => resolve_type(store, uri, tree.node(node).lhs, depth + 1),
            }
        }
        NodeTag::StructInit => {
            let type_expr = tree.node(node).lhs;
            if type_expr == NULL_NODE {
                return None;
            }
            resolve_type(store, uri, type_expr, depth + 1).map(TypeWithHandle::instance)
        }
        _ => None,
    }
}

/// Declared type of a resolved declaration.
pub fn resolve_decl_type(
    store: &DocumentStore,
    decl: &Declaration,
    depth: usize,
) -> Option<TypeWithHandle> {
    if depth > MAX_TYPE_DEPTH {
        return None;
    }
    let handle = store.get_handle(&decl.uri)?;
    let tree = &handle.tree;
    match &decl.kind {
        DeclKind::AstNode(node) => match tree.node_tag(*node) {
            NodeTag::Root => Some(TypeWithHandle::type_val(
                TypeData::Other(NULL_NODE),
                decl.uri.clone(),
            )),
            NodeTag::VarDecl => {
                let var = tree.var_decl(*node)?;
                if var.type_node != NULL_NODE {
                    let annotated = resolve_type(store, &decl.uri, var.type_node, depth + 1)?;
                    if annotated.data == TypeData::Primitive("type".into())
                        && var.init_node != NULL_NODE
                    {
                        return resolve_type(store, &decl.uri, var.init_node, depth + 1);
                    }
                    return Some(annotated.instance());
                }
                resolve_type(store, &decl.uri, var.init_node, depth + 1)
            }
            NodeTag::FnDecl => Some(TypeWithHandle {
                data: TypeData::Other(*node),
                is_type_val: false,
                uri: decl.uri.clone(),
            }),
            NodeTag::ContainerField => {
                let field = tree.container_field(*node)?;
                if field.type_node != NULL_NODE {
                    return resolve_type(store, &decl.uri, field.type_node, depth + 1)
                        .map(TypeWithHandle::instance);
                }
                // enum variant: its type is the enclosing enum
                let container = find_container_of(tree, *node)?;
                Some(TypeWithHandle {
                    data: TypeData::Other(container),
                    is_type_val: false,
                    uri: decl.uri.clone(),
                })
            }
            _ => None,
        },
        DeclKind::Param { param, .. } => {
            let type_node = tree.node(*param).lhs;
            if type_node == NULL_NODE {
                return None;
            }
            resolve_type(store, &decl.uri, type_node, depth + 1).map(TypeWithHandle::instance)
        }
        DeclKind::PointerPayload { condition, .. } => {
            let cond_ty = resolve_type(store, &decl.uri, *condition, depth + 1)?;
            unwrap_optional(store, &cond_ty, depth + 1).or(Some(cond_ty))
        }
        DeclKind::ArrayPayload { array_expr, .. } => {
            let array_ty = resolve_type(store, &decl.uri, *array_expr, depth + 1)?;
            element_type(store, &array_ty, depth + 1)
        }
        DeclKind::ArrayIndex { .. } => Some(TypeWithHandle {
            data: TypeData::Primitive("usize".into()),
            is_type_val: false,
            uri: decl.uri.clone(),
        }),
        DeclKind::SwitchPayload { operand, .. } => {
            resolve_type(store, &decl.uri, *operand, depth + 1)
        }
        DeclKind::Label { .. } => None,
    }
}

/// Return type of calling a function declaration. When the function returns
/// `type` (a type factory), the returned expression is resolved instead.
fn resolve_call_return(
    store: &DocumentStore,
    decl: &Declaration,
    depth: usize,
) -> Option<TypeWithHandle> {
    let DeclKind::AstNode(node) = decl.kind else {
        return None;
    };
    let handle = store.get_handle(&decl.uri)?;
    let tree = &handle.tree;
    if tree.node_tag(node) != NodeTag::FnDecl {
        return None;
    }
    let proto = tree.fn_proto(node)?;
    let return_ty = resolve_type(store, &decl.uri, proto.return_type, depth + 1)?;
    if return_ty.data == TypeData::Primitive("type".into()) {
        let body = tree.node(node).rhs;
        if body != NULL_NODE {
            for &stmt in tree.extra_range(tree.node(body).lhs) {
                if tree.node_tag(stmt) == NodeTag::Return && tree.node(stmt).lhs != NULL_NODE {
                    return resolve_type(store, &decl.uri, tree.node(stmt).lhs, depth + 1);
                }
            }
        }
        return None;
    }
    Some(return_ty.instance())
}

fn resolve_member_type(
    store: &DocumentStore,
    base: &TypeWithHandle,
    name: &str,
    depth: usize,
) -> Option<TypeWithHandle> {
    match &base.data {
        TypeData::Slice(elem) => match name {
            "len" => Some(TypeWithHandle {
                data: TypeData::Primitive("usize".into()),
                is_type_val: false,
                uri: base.uri.clone(),
            }),
            "ptr" => Some(TypeWithHandle {
                data: TypeData::Pointer(*elem),
                is_type_val: false,
                uri: base.uri.clone(),
            }),
            _ => None,
        },
        _ => {
            let container = member_container(store, base)?;
            let decl = lookup_symbol_container(
                store,
                &container.uri,
                container.node,
                name,
                !base.is_type_val,
            )?;
            let decl = resolve_alias(store, &decl).unwrap_or(decl);
            resolve_decl_type(store, &decl, depth)
        }
    }
}

fn unwrap_error_union(
    store: &DocumentStore,
    ty: &TypeWithHandle,
    depth: usize,
) -> Option<TypeWithHandle> {
    let handle = store.get_handle(&ty.uri)?;
    let tree = &handle.tree;
    match ty.data {
        TypeData::ErrorUnion(payload) => {
            resolve_type(store, &ty.uri, payload, depth).map(TypeWithHandle::instance)
        }
        TypeData::Other(node) if tree.node_tag(node) == NodeTag::ErrorUnionType => {
            resolve_type(store, &ty.uri, tree.node(node).rhs, depth).map(TypeWithHandle::instance)
        }
        _ => None,
    }
}

fn unwrap_optional(
    store: &DocumentStore,
    ty: &TypeWithHandle,
    depth: usize,
) -> Option<TypeWithHandle> {
    let handle = store.get_handle(&ty.uri)?;
    let tree = &handle.tree;
    match ty.data {
        TypeData::Other(node) if tree.node_tag(node) == NodeTag::OptionalType => {
            resolve_type(store, &ty.uri, tree.node(node).lhs, depth).map(TypeWithHandle::instance)
        }
        _ => None,
    }
}

fn deref_pointer(
    store: &DocumentStore,
    ty: &TypeWithHandle,
    depth: usize,
) -> Option<TypeWithHandle> {
    let handle = store.get_handle(&ty.uri)?;
    let tree = &handle.tree;
    match ty.data {
        TypeData::Pointer(pointee) => {
            resolve_type(store, &ty.uri, pointee, depth).map(TypeWithHandle::instance)
        }
        TypeData::Other(node) if tree.node_tag(node) == NodeTag::PtrType => {
            resolve_type(store, &ty.uri, tree.node(node).lhs, depth).map(TypeWithHandle::instance)
        }
        _ => None,
    }
}

fn element_type(
    store: &DocumentStore,
    ty: &TypeWithHandle,
    depth: usize,
) -> Option<TypeWithHandle> {
    let handle = store.get_handle(&ty.uri)?;
    let tree = &handle.tree;
    match ty.data {
        TypeData::Slice(elem) => {
            if elem == NULL_NODE {
                return Some(TypeWithHandle {
                    data: TypeData::Primitive("u8".into()),
                    is_type_val: false,
                    uri: ty.uri.clone(),
                });
            }
            resolve_type(store, &ty.uri, elem, depth).map(TypeWithHandle::instance)
        }
        TypeData::Other(node) if tree.node_tag(node) == NodeTag::ArrayType => {
            resolve_type(store, &ty.uri, tree.node(node).rhs, depth).map(TypeWithHandle::instance)
        }
        _ => None,
    }
}

/// Innermost container declaration containing the offset; 0 = file root.
pub fn enclosing_container(tree: &Ast, offset: usize) -> NodeIndex {
    let mut best = NULL_NODE;
    let mut best_len = usize::MAX;
    for index in 0..tree.node_count() as NodeIndex {
        if tree.node_tag(index) != NodeTag::ContainerDecl {
            continue;
        }
        let span = tree.node_span(index);
        if span.contains(offset) && span.len() < best_len {
            best = index;
            best_len = span.len();
        }
    }
    best
}

/// Container whose member list includes the node.
pub fn find_container_of(tree: &Ast, member: NodeIndex) -> Option<NodeIndex> {
    (0..tree.node_count() as NodeIndex).find(|&index| {
        tree.node_tag(index) == NodeTag::ContainerDecl
            && tree.container_members(index).contains(&member)
    })
}

// ----- field-access chains over raw text -----

/// Resolve a dotted source slice (`a.b.c`) to the declaration of its last
/// segment.
pub fn resolve_chain_decl(store: &DocumentStore, uri: &Uri, span: Span) -> Option<Declaration> {
    walk_chain(store, uri, span)?.decl
}

/// Resolve a dotted source slice to the type of the whole expression,
/// reporting both the declared type and its one-level unwrap.
pub fn resolve_expr_chain(
    store: &DocumentStore,
    uri: &Uri,
    span: Span,
) -> Option<FieldAccessReturn> {
    let resolution = walk_chain(store, uri, span)?;
    let original = resolution.ty?;
    let unwrapped = unwrap_for_access(store, &original);
    Some(FieldAccessReturn {
        original,
        unwrapped,
    })
}

/// One-level `?`/`!` unwrap applied when offering completions.
pub fn unwrap_for_access(store: &DocumentStore, ty: &TypeWithHandle) -> Option<TypeWithHandle> {
    unwrap_optional(store, ty, 0).or_else(|| unwrap_error_union(store, ty, 0))
}

struct ChainResolution {
    ty: Option<TypeWithHandle>,
    decl: Option<Declaration>,
}

/// Left-fold a dotted chain taken from raw document text. Tolerates calls
/// (`a.foo().bar`) and the postfix unwraps.
fn walk_chain(store: &DocumentStore, uri: &Uri, span: Span) -> Option<ChainResolution> {
    let handle = store.get_handle(uri)?;
    let text = &handle.text;
    if span.start >= span.end || span.end > text.len() {
        return None;
    }
    let slice = &text[span.start..span.end];
    let tokens: Vec<_> = lexer::lex(slice)
        .into_iter()
        .filter(|token| !token.tag.is_trivia() && token.tag != TokenTag::Eof)
        .collect();
    let mut iter = tokens.iter().peekable();

    let first = iter.next()?;
    if first.tag != TokenTag::Identifier {
        return None;
    }
    let first_name = &slice[first.span.start..first.span.end];
    let mut decl = lookup_symbol_global(store, uri, first_name, span.start + first.span.start)?;
    let mut ty = resolve_decl_type(store, &decl, 0);

    while let Some(token) = iter.next() {
        match token.tag {
            TokenTag::Dot => {
                let name_token = iter.next()?;
                if name_token.tag != TokenTag::Identifier {
                    return None;
                }
                let name = &slice[name_token.span.start..name_token.span.end];
                let base = ty.as_ref()?;
                let base = unwrap_auto(store, base);
                let container = member_container(store, &base)?;
                let member = lookup_symbol_container(
                    store,
                    &container.uri,
                    container.node,
                    name,
                    !base.is_type_val,
                )?;
                let resolved = resolve_alias(store, &member).unwrap_or_else(|| member.clone());
                ty = resolve_decl_type(store, &resolved, 0);
                decl = member;
            }
            TokenTag::LParen => {
                // skip the argument list, then map through the return type
                let mut depth = 1usize;
                for inner in iter.by_ref() {
                    match inner.tag {
                        TokenTag::LParen => depth += 1,
                        TokenTag::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let callee = resolve_alias(store, &decl).unwrap_or_else(|| decl.clone());
                ty = resolve_call_return(store, &callee, 0).or(ty);
            }
            TokenTag::DotStar => {
                ty = ty.as_ref().and_then(|ty| deref_pointer(store, ty, 0));
            }
            TokenTag::DotQuestion => {
                ty = ty.as_ref().and_then(|ty| unwrap_optional(store, ty, 0));
            }
            _ => return None,
        }
    }
    Some(ChainResolution {
        ty,
        decl: Some(decl),
    })
}

/// Pointer/optional auto-unwrap applied between chain segments.
fn unwrap_auto(store: &DocumentStore, ty: &TypeWithHandle) -> TypeWithHandle {
    if let Some(derefed) = deref_pointer(store, ty, 0) {
        return derefed;
    }
    if let Some(unwrapped) = unwrap_optional(store, ty, 0) {
        return unwrapped;
    }
    ty.clone()
}

// ----- doc comments -----

/// Doc comment text attached to the declaration, with the comment markers
/// stripped. Lines keep their order; `None` when there is no run.
pub fn doc_comments(store: &DocumentStore, decl: &Declaration) -> Option<String> {
    let DeclKind::AstNode(node) = decl.kind else {
        return None;
    };
    let handle = store.get_handle(&decl.uri)?;
    let tree = &handle.tree;
    if node == NULL_NODE {
        return None;
    }
    let first_token = tree.first_token_at(tree.node_span(node).start)?;
    let run = tree.doc_comment_tokens(first_token);
    if run.is_empty() {
        return None;
    }
    let mut out = String::new();
    for token in run {
        let line = tree
            .token_source(&handle.text, token)
            .trim_start_matches("///")
            .trim_start_matches(' ');
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    Some(out)
}

// ----- position context -----

/// Syntactic category at the cursor, derived from a coarse text scan so it
/// works on code the parser cannot handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PositionContext {
    Builtin(Span),
    VarAccess(Span),
    /// Span from the start of the leading identifier to the cursor.
    FieldAccess(Span),
    StringLiteral,
    EnumLiteral,
    GlobalErrorSet,
    Label,
    Empty,
    Other,
}

pub fn position_context(text: &str, offset: usize) -> PositionContext {
    let offset = offset.min(text.len());
    if in_string_literal(text, offset) {
        return PositionContext::StringLiteral;
    }
    let bytes = text.as_bytes();
    let word_start = scan_identifier_start(text, offset);
    let before_word = word_start;

    // builtin: @word
    if before_word > 0 && bytes[before_word - 1] == b'@' {
        return PositionContext::Builtin(Span::new(before_word - 1, offset));
    }

    // label: `break :word` / `continue :word`
    if before_word > 0 && bytes[before_word - 1] == b':' {
        let keyword_end = skip_ws_back(text, before_word - 1);
        let keyword_start = scan_identifier_start(text, keyword_end);
        let keyword = &text[keyword_start..keyword_end];
        if keyword == "break" || keyword == "continue" {
            return PositionContext::Label;
        }
    }

    let prev = skip_ws_back(text, before_word);
    if prev > 0 && bytes[prev - 1] == b'.' {
        // something.word: field access, enum literal, or error set
        let dot = prev - 1;
        let recv_end = skip_ws_back(text, dot);
        if recv_end == 0 {
            return PositionContext::EnumLiteral;
        }
        let recv = bytes[recv_end - 1];
        if recv.is_ascii_alphanumeric() || recv == b'_' || recv == b')' || recv == b']' {
            let recv_word_start = scan_identifier_start(text, recv_end);
            if &text[recv_word_start..recv_end] == "error" {
                return PositionContext::GlobalErrorSet;
            }
            let chain_start = scan_chain_start(text, recv_end);
            return PositionContext::FieldAccess(Span::new(chain_start, offset));
        }
        return PositionContext::EnumLiteral;
    }

    if word_start < offset {
        return PositionContext::VarAccess(Span::new(word_start, offset));
    }
    if text[..offset].trim().is_empty() || matches!(prev.checked_sub(1).map(|i| bytes[i]), None | Some(b'{' | b'}' | b';' | b'(' | b',' | b'=')) {
        return PositionContext::Empty;
    }
    PositionContext::Other
}

fn in_string_literal(text: &str, offset: usize) -> bool {
    let line_start = text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut inside = false;
    let mut escaped = false;
    for byte in text[line_start..offset].bytes() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' => escaped = true,
            b'"' => inside = !inside,
            _ => {}
        }
    }
    inside
}

fn scan_identifier_start(text: &str, offset: usize) -> usize {
    let bytes = text.as_bytes();
    let mut start = offset;
    while start > 0 {
        let byte = bytes[start - 1];
        if byte.is_ascii_alphanumeric() || byte == b'_' {
            start -= 1;
        } else {
            break;
        }
    }
    start
}

fn skip_ws_back(text: &str, mut offset: usize) -> usize {
    let bytes = text.as_bytes();
    while offset > 0 && bytes[offset - 1].is_ascii_whitespace() {
        offset -= 1;
    }
    offset
}

/// Walk back over `ident ( . ident | () | [] )*` to the chain's first
/// identifier.
fn scan_chain_start(text: &str, mut end: usize) -> usize {
    let bytes = text.as_bytes();
    loop {
        end = skip_ws_back(text, end);
        if end == 0 {
            return 0;
        }
        match bytes[end - 1] {
            b')' | b']' => {
                let close = bytes[end - 1];
                let open = if close == b')' { b'(' } else { b'[' };
                let mut depth = 1usize;
                end -= 1;
                while end > 0 && depth > 0 {
                    end -= 1;
                    if bytes[end] == close {
                        depth += 1;
                    } else if bytes[end] == open {
                        depth -= 1;
                    }
                }
            }
            byte if byte.is_ascii_alphanumeric() || byte == b'_' => {
                let start = scan_identifier_start(text, end);
                let before = skip_ws_back(text, start);
                if before > 0 && bytes[before - 1] == b'.' {
                    end = before - 1;
                } else {
                    return start;
                }
            }
            _ => return end,
        }
    }
}
