use crate::language::ast::{NodeIndex, NodeTag, NULL_NODE};
use crate::language::span::Span;
use crate::language::token::TokenTag;
use crate::lsp::analysis::{self, Declaration, DeclKind, PositionContext, TypeWithHandle};
use crate::lsp::builtins::builtins;
use crate::lsp::hover::decl_signature;
use crate::lsp::store::DocumentStore;
use tower_lsp_server::lsp_types::{
    CompletionItem, CompletionItemKind, Documentation, InsertTextFormat, MarkupContent, MarkupKind,
    Uri,
};

/// Client- and config-negotiated knobs the item builders care about.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompletionSettings {
    pub snippets: bool,
    pub markdown: bool,
    pub operator_completions: bool,
}

/// Completion entry point: classify the cursor position, then build the
/// matching item class.
pub fn completion_items(
    store: &DocumentStore,
    uri: &Uri,
    offset: usize,
    settings: CompletionSettings,
) -> Vec<CompletionItem> {
    let Some(handle) = store.get_handle(uri) else {
        return Vec::new();
    };
    let text = handle.text.clone();
    match analysis::position_context(&text, offset) {
        PositionContext::Builtin(span) => {
            let typed = &text[span.start.min(text.len())..offset.min(text.len())];
            builtin_items(typed, settings)
        }
        PositionContext::VarAccess(_) | PositionContext::Empty => {
            scope_items(store, uri, offset, settings)
        }
        PositionContext::FieldAccess(span) => {
            field_access_items(store, uri, span, offset, settings)
        }
        PositionContext::EnumLiteral => enum_literal_items(store, uri, offset, settings),
        PositionContext::GlobalErrorSet => error_set_items(store),
        PositionContext::Label => label_items(store, uri, offset),
        PositionContext::StringLiteral | PositionContext::Other => Vec::new(),
    }
}

fn builtin_items(typed: &str, settings: CompletionSettings) -> Vec<CompletionItem> {
    builtins()
        .iter()
        .filter(|builtin| builtin.name.starts_with(typed) || typed == "@")
        .map(|builtin| {
            // the client already has the `@`
            let (insert, format) = if settings.snippets {
                (
                    builtin.snippet.trim_start_matches('@').to_string(),
                    InsertTextFormat::SNIPPET,
                )
            } else {
                (
                    builtin.name.trim_start_matches('@').to_string(),
                    InsertTextFormat::PLAIN_TEXT,
                )
            };
            CompletionItem {
                label: builtin.name.to_string(),
                kind: Some(CompletionItemKind::FUNCTION),
                detail: Some(builtin.signature.to_string()),
                documentation: Some(documentation(builtin.documentation, settings.markdown)),
                insert_text: Some(insert),
                insert_text_format: Some(format),
                ..Default::default()
            }
        })
        .collect()
}

fn scope_items(
    store: &DocumentStore,
    uri: &Uri,
    offset: usize,
    settings: CompletionSettings,
) -> Vec<CompletionItem> {
    analysis::visible_declarations(store, uri, offset)
        .into_iter()
        .map(|(name, decl)| item_for_decl(store, &name, &decl, None, settings))
        .collect()
}

fn field_access_items(
    store: &DocumentStore,
    uri: &Uri,
    span: Span,
    offset: usize,
    settings: CompletionSettings,
) -> Vec<CompletionItem> {
    let Some(handle) = store.get_handle(uri) else {
        return Vec::new();
    };
    let end = offset.min(handle.text.len());
    let slice = &handle.text[span.start..end];
    let Some(dot) = slice.rfind('.') else {
        return Vec::new();
    };
    let receiver = Span::new(span.start, span.start + dot);
    let Some(access) = analysis::resolve_expr_chain(store, uri, receiver) else {
        return Vec::new();
    };

    let mut items = type_member_items(store, &access.original, settings);
    if items.is_empty() {
        if let Some(unwrapped) = &access.unwrapped {
            items = type_member_items(store, unwrapped, settings);
        }
    }
    if settings.operator_completions {
        if analysis::is_pointer_type(store, &access.original) {
            items.push(operator_item("*", "dereference the pointer"));
        }
        if analysis::is_optional_type(store, &access.original) {
            items.push(operator_item("?", "unwrap the optional"));
        }
    }
    items
}

fn type_member_items(
    store: &DocumentStore,
    ty: &TypeWithHandle,
    settings: CompletionSettings,
) -> Vec<CompletionItem> {
    use crate::lsp::analysis::TypeData;
    let mut items = Vec::new();
    match &ty.data {
        TypeData::Slice(_) => {
            items.push(CompletionItem {
                label: "len".into(),
                kind: Some(CompletionItemKind::FIELD),
                detail: Some("usize".into()),
                ..Default::default()
            });
            items.push(CompletionItem {
                label: "ptr".into(),
                kind: Some(CompletionItemKind::FIELD),
                detail: Some("many-item pointer".into()),
                ..Default::default()
            });
        }
        _ => {
            let Some((container_uri, container_node)) = analysis::container_of_type(store, ty)
            else {
                return items;
            };
            let Some(handle) = store.get_handle(&container_uri) else {
                return items;
            };
            let tree = &handle.tree;
            let members: Vec<u32> = if container_node == NULL_NODE {
                tree.root_decls.clone()
            } else {
                tree.container_members(container_node).to_vec()
            };
            let is_enum = analysis::is_enum_container(store, &container_uri, container_node);
            let instance = !ty.is_type_val;
            for member in members {
                let tag = tree.node_tag(member);
                let include = match tag {
                    NodeTag::ContainerField => true,
                    NodeTag::FnDecl => true,
                    NodeTag::VarDecl => !instance,
                    _ => false,
                };
                if !include {
                    continue;
                }
                let decl = Declaration {
                    uri: container_uri.clone(),
                    kind: DeclKind::AstNode(member),
                };
                let Some(name) = analysis::decl_name(store, &decl) else {
                    continue;
                };
                let receiver = instance.then(|| (container_uri.clone(), container_node));
                let mut item = item_for_decl(store, &name, &decl, receiver, settings);
                if is_enum && tag == NodeTag::ContainerField {
                    item.kind = Some(CompletionItemKind::ENUM_MEMBER);
                }
                items.push(item);
            }
        }
    }
    items
}

fn enum_literal_items(
    store: &DocumentStore,
    uri: &Uri,
    offset: usize,
    settings: CompletionSettings,
) -> Vec<CompletionItem> {
    if let Some((enum_uri, enum_node)) = expected_enum_at(store, uri, offset) {
        return enum_variant_items(store, &enum_uri, enum_node, settings);
    }
    // no expected type to be found; offer variants of every enum in the file
    let Some(handle) = store.get_handle(uri) else {
        return Vec::new();
    };
    let tree = handle.tree.clone();
    let mut items = Vec::new();
    for node in 0..tree.node_count() as NodeIndex {
        if analysis::is_enum_container(store, uri, node) {
            items.extend(enum_variant_items(store, uri, node, settings));
        }
    }
    items
}

/// Expected enum type at the cursor: the operand of an enclosing `switch`,
/// or the left-hand side of an `=`/`==` just before the literal.
fn expected_enum_at(
    store: &DocumentStore,
    uri: &Uri,
    offset: usize,
) -> Option<(Uri, NodeIndex)> {
    let handle = store.get_handle(uri)?;
    let tree = &handle.tree;
    // enclosing switch
    let mut innermost: Option<NodeIndex> = None;
    let mut innermost_len = usize::MAX;
    for node in 0..tree.node_count() as NodeIndex {
        if tree.node_tag(node) != NodeTag::Switch {
            continue;
        }
        let span = tree.node_span(node);
        if span.contains(offset) && span.len() < innermost_len {
            innermost = Some(node);
            innermost_len = span.len();
        }
    }
    if let Some(switch_node) = innermost {
        let operand = tree.node(switch_node).lhs;
        let ty = analysis::resolve_type_of_node(store, uri, operand)?;
        let (container_uri, container_node) = analysis::container_of_type(store, &ty)?;
        if analysis::is_enum_container(store, &container_uri, container_node) {
            return Some((container_uri, container_node));
        }
        return None;
    }
    // `lhs = .` / `lhs == .`
    let text = &handle.text;
    let bytes = text.as_bytes();
    let mut i = offset.min(text.len());
    while i > 0 && (bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_') {
        i -= 1;
    }
    if i == 0 || bytes[i - 1] != b'.' {
        return None;
    }
    i -= 1;
    while i > 0 && bytes[i - 1].is_ascii_whitespace() {
        i -= 1;
    }
    while i > 0 && bytes[i - 1] == b'=' {
        i -= 1;
    }
    let chain_end = {
        let mut end = i;
        while end > 0 && bytes[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        end
    };
    if chain_end == 0 {
        return None;
    }
    let context = analysis::position_context(text, chain_end);
    let chain = match context {
        PositionContext::FieldAccess(span) => span,
        PositionContext::VarAccess(span) => span,
        _ => return None,
    };
    let access = analysis::resolve_expr_chain(store, uri, chain)?;
    let (container_uri, container_node) = analysis::container_of_type(store, &access.original)?;
    analysis::is_enum_container(store, &container_uri, container_node)
        .then_some((container_uri, container_node))
}

fn enum_variant_items(
    store: &DocumentStore,
    uri: &Uri,
    node: NodeIndex,
    settings: CompletionSettings,
) -> Vec<CompletionItem> {
    let Some(handle) = store.get_handle(uri) else {
        return Vec::new();
    };
    let tree = &handle.tree;
    let mut items = Vec::new();
    for &member in tree.container_members(node) {
        if tree.node_tag(member) != NodeTag::ContainerField {
            continue;
        }
        let decl = Declaration {
            uri: uri.clone(),
            kind: DeclKind::AstNode(member),
        };
        let Some(name) = analysis::decl_name(store, &decl) else {
            continue;
        };
        let mut item = item_for_decl(store, &name, &decl, None, settings);
        item.kind = Some(CompletionItemKind::ENUM_MEMBER);
        items.push(item);
    }
    items
}

/// Error names declared anywhere in the reachable graph.
fn error_set_items(store: &DocumentStore) -> Vec<CompletionItem> {
    let mut names = std::collections::BTreeSet::new();
    for handle in store.handles() {
        let tree = &handle.tree;
        for node in 0..tree.node_count() as NodeIndex {
            match tree.node_tag(node) {
                NodeTag::ErrorSetDecl => {
                    for &token in tree.extra_range(tree.node(node).lhs) {
                        names.insert(tree.token_source(&handle.text, token).to_string());
                    }
                }
                NodeTag::ErrorValue => {
                    names.insert(
                        tree.token_source(&handle.text, tree.node(node).main_token)
                            .to_string(),
                    );
                }
                _ => {}
            }
        }
    }
    names
        .into_iter()
        .map(|name| CompletionItem {
            label: name,
            kind: Some(CompletionItemKind::CONSTANT),
            ..Default::default()
        })
        .collect()
}

fn label_items(store: &DocumentStore, uri: &Uri, offset: usize) -> Vec<CompletionItem> {
    analysis::visible_labels(store, uri, offset)
        .into_iter()
        .map(|(name, _)| CompletionItem {
            label: name,
            kind: Some(CompletionItemKind::KEYWORD),
            ..Default::default()
        })
        .collect()
}

fn operator_item(label: &str, detail: &str) -> CompletionItem {
    CompletionItem {
        label: label.to_string(),
        kind: Some(CompletionItemKind::OPERATOR),
        detail: Some(detail.to_string()),
        ..Default::default()
    }
}

fn documentation(text: &str, markdown: bool) -> Documentation {
    Documentation::MarkupContent(MarkupContent {
        kind: if markdown {
            MarkupKind::Markdown
        } else {
            MarkupKind::PlainText
        },
        value: text.to_string(),
    })
}

/// Build one completion item for a declaration. `method_receiver` is the
/// container the completion is offered on when the receiver is an instance;
/// member functions whose first parameter matches it insert as method calls.
fn item_for_decl(
    store: &DocumentStore,
    name: &str,
    decl: &Declaration,
    method_receiver: Option<(Uri, NodeIndex)>,
    settings: CompletionSettings,
) -> CompletionItem {
    let kind = kind_for_decl(store, decl);
    let detail = decl_signature(store, decl);
    let docs = analysis::doc_comments(store, decl)
        .map(|docs| documentation(&docs, settings.markdown));
    let mut item = CompletionItem {
        label: name.to_string(),
        kind: Some(kind),
        detail,
        documentation: docs,
        ..Default::default()
    };
    if settings.snippets && kind == CompletionItemKind::FUNCTION {
        if let Some(snippet) = fn_snippet(store, decl, method_receiver) {
            item.insert_text = Some(snippet);
            item.insert_text_format = Some(InsertTextFormat::SNIPPET);
        }
    }
    item
}

fn kind_for_decl(store: &DocumentStore, decl: &Declaration) -> CompletionItemKind {
    let Some(handle) = store.get_handle(&decl.uri) else {
        return CompletionItemKind::VARIABLE;
    };
    let tree = &handle.tree;
    match &decl.kind {
        DeclKind::AstNode(node) => match tree.node_tag(*node) {
            NodeTag::FnDecl => CompletionItemKind::FUNCTION,
            NodeTag::ContainerField => CompletionItemKind::FIELD,
            NodeTag::VarDecl => {
                let Some(var) = tree.var_decl(*node) else {
                    return CompletionItemKind::VARIABLE;
                };
                if var.init_node != NULL_NODE {
                    match tree.node_tag(var.init_node) {
                        NodeTag::ContainerDecl => {
                            return match tree.token_tag(tree.node(var.init_node).main_token) {
                                TokenTag::KeywordEnum => CompletionItemKind::ENUM,
                                _ => CompletionItemKind::STRUCT,
                            };
                        }
                        NodeTag::BuiltinCall => return CompletionItemKind::MODULE,
                        _ => {}
                    }
                }
                if var.is_const {
                    CompletionItemKind::CONSTANT
                } else {
                    CompletionItemKind::VARIABLE
                }
            }
            NodeTag::Root => CompletionItemKind::MODULE,
            _ => CompletionItemKind::VARIABLE,
        },
        DeclKind::Param { .. } => CompletionItemKind::VARIABLE,
        DeclKind::Label { .. } => CompletionItemKind::KEYWORD,
        _ => CompletionItemKind::VARIABLE,
    }
}

/// Call snippet for a function declaration. The first parameter is omitted
/// when it structurally matches the receiver container (method-call idiom).
fn fn_snippet(
    store: &DocumentStore,
    decl: &Declaration,
    method_receiver: Option<(Uri, NodeIndex)>,
) -> Option<String> {
    let DeclKind::AstNode(node) = decl.kind else {
        return None;
    };
    let handle = store.get_handle(&decl.uri)?;
    let tree = &handle.tree;
    let proto = tree.fn_proto(node)?;
    let name = tree.token_source(&handle.text, proto.name_token?);

    let mut params: &[NodeIndex] = &proto.params;
    if let (Some((recv_uri, recv_node)), Some(&first)) = (method_receiver, proto.params.first()) {
        let first_type = tree.node(first).lhs;
        if first_type != NULL_NODE {
            let resolved = analysis::resolve_type_of_node(store, &decl.uri, first_type);
            if let Some(resolved) = resolved {
                if let Some((uri, container)) = analysis::container_of_type(store, &resolved) {
                    if uri == recv_uri && container == recv_node {
                        params = &proto.params[1..];
                    }
                }
            }
        }
    }

    let mut snippet = format!("{name}(");
    for (i, &param) in params.iter().enumerate() {
        if i > 0 {
            snippet.push_str(", ");
        }
        let param_name = tree.token_source(&handle.text, tree.node(param).main_token);
        snippet.push_str(&format!("${{{}:{}}}", i + 1, param_name));
    }
    snippet.push(')');
    Some(snippet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::lsp::uri::path_to_uri;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn one_file(source: &str) -> (tempfile::TempDir, DocumentStore, Uri) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("main.zig");
        fs::write(&path, source).expect("write");
        let uri = path_to_uri(&path).expect("uri");
        let mut store = DocumentStore::new(Arc::new(Config::default()));
        store.open_document(uri.clone(), source.to_string());
        (dir, store, uri)
    }

    fn labels(items: &[CompletionItem]) -> Vec<String> {
        let mut out: Vec<String> = items.iter().map(|item| item.label.clone()).collect();
        out.sort();
        out
    }

    #[test]
    fn field_access_lists_struct_fields() {
        let source = "const P = struct { x: i32, y: i32 };\nvar p: P = undefined;\nfn f() void {\n    p.\n}\n";
        let (_dir, store, uri) = one_file(source);
        let offset = source.find("p.\n").unwrap() + 2;
        let items = completion_items(&store, &uri, offset, CompletionSettings::default());
        assert_eq!(labels(&items), vec!["x", "y"]);
        assert!(items
            .iter()
            .all(|item| item.kind == Some(CompletionItemKind::FIELD)));
    }

    #[test]
    fn builtin_context_offers_builtins() {
        let source = "const std = @imp";
        let (_dir, store, uri) = one_file(source);
        let items = completion_items(&store, &uri, source.len(), CompletionSettings::default());
        assert!(labels(&items).contains(&"@import".to_string()));
        assert!(items.iter().all(|item| item
            .label
            .starts_with("@imp")));
    }

    #[test]
    fn scope_completion_includes_locals_params_and_globals() {
        let source = "const top = 1;\nfn f(arg: i32) void {\n    const local = 2;\n    \n}\n";
        let (_dir, store, uri) = one_file(source);
        let offset = source.find("    \n").unwrap() + 4;
        let items = completion_items(&store, &uri, offset, CompletionSettings::default());
        let names = labels(&items);
        for expected in ["top", "f", "arg", "local"] {
            assert!(names.contains(&expected.to_string()), "missing {expected} in {names:?}");
        }
    }

    #[test]
    fn switch_enum_literal_completion_uses_operand_type() {
        let source = "const Color = enum { red, green, blue };\nfn f(c: Color) i32 {\n    return switch (c) {\n        .red => 1,\n        . => 0,\n    };\n}\n";
        let (_dir, store, uri) = one_file(source);
        let offset = source.find(". =>").unwrap() + 1;
        let items = completion_items(&store, &uri, offset, CompletionSettings::default());
        assert_eq!(labels(&items), vec!["blue", "green", "red"]);
        assert!(items
            .iter()
            .all(|item| item.kind == Some(CompletionItemKind::ENUM_MEMBER)));
    }

    #[test]
    fn error_set_completion_collects_all_names() {
        let source = "const E = error { OutOfMemory, NotFound };\nfn f() void {\n    const x = error.\n}\n";
        let (_dir, store, uri) = one_file(source);
        let offset = source.find("error.\n").unwrap() + "error.".len();
        let items = completion_items(&store, &uri, offset, CompletionSettings::default());
        assert_eq!(labels(&items), vec!["NotFound", "OutOfMemory"]);
    }

    #[test]
    fn pointer_receiver_offers_deref_operator() {
        let source = "const P = struct { x: i32 };\nfn f(p: *P) void {\n    p.\n}\n";
        let (_dir, store, uri) = one_file(source);
        let offset = source.find("p.\n").unwrap() + 2;
        let settings = CompletionSettings {
            operator_completions: true,
            ..Default::default()
        };
        let items = completion_items(&store, &uri, offset, settings);
        let names = labels(&items);
        assert!(names.contains(&"*".to_string()), "{names:?}");
        assert!(names.contains(&"x".to_string()), "{names:?}");
    }

    #[test]
    fn method_snippet_omits_self_parameter() {
        let source = "const P = struct {\n    x: i32,\n    pub fn shift(self: P, dx: i32) P {\n        return self;\n    }\n};\nvar p: P = undefined;\nfn f() void {\n    p.\n}\n";
        let (_dir, store, uri) = one_file(source);
        let offset = source.find("p.\n").unwrap() + 2;
        let settings = CompletionSettings {
            snippets: true,
            ..Default::default()
        };
        let items = completion_items(&store, &uri, offset, settings);
        let shift = items
            .iter()
            .find(|item| item.label == "shift")
            .expect("shift item");
        assert_eq!(shift.insert_text.as_deref(), Some("shift(${1:dx})"));
    }

    #[test]
    fn slice_members_are_len_and_ptr() {
        let source = "fn f(items: []i32) void {\n    items.\n}\n";
        let (_dir, store, uri) = one_file(source);
        let offset = source.find("items.\n").unwrap() + "items.".len();
        let items = completion_items(&store, &uri, offset, CompletionSettings::default());
        assert_eq!(labels(&items), vec!["len", "ptr"]);
    }
}
