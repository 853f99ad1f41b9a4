use crate::language::{
    ast::{Ast, NodeIndex, NodeTag, TokenIndex},
    token::TokenTag,
};
use crate::lsp::analysis::{
    self, Declaration, DeclKind, PositionContext,
};
use crate::lsp::offsets::span_to_range;
use crate::lsp::store::{DocumentStore, Handle};
use crate::lsp::uri::uri_to_path;
use std::collections::HashMap;
use tower_lsp_server::lsp_types::{Location, TextEdit, Uri, WorkspaceEdit};

/// Every occurrence in the store that resolves to `decl`. Exact resolution
/// equality, not name matching: a shadowing local with the same name is not
/// a reference.
pub fn symbol_references(
    store: &DocumentStore,
    decl: &Declaration,
    include_decl: bool,
    skip_std: bool,
) -> Vec<Location> {
    let mut locations = Vec::new();
    for handle in store.handles() {
        if skip_std && is_std_handle(store, handle) {
            continue;
        }
        collect_in_handle(store, handle, decl, include_decl, &mut locations);
    }
    locations
}

/// References to a block label, scoped to the function that declares it.
pub fn label_references(
    store: &DocumentStore,
    decl: &Declaration,
    include_decl: bool,
) -> Vec<Location> {
    let DeclKind::Label { token, .. } = &decl.kind else {
        return Vec::new();
    };
    let Some(handle) = store.get_handle(&decl.uri) else {
        return Vec::new();
    };
    let tree = &handle.tree;
    let name = tree.token_source(&handle.text, *token);
    let mut locations = Vec::new();
    if include_decl {
        locations.push(location_of(store, handle, *token));
    }
    for index in 0..tree.token_count() as TokenIndex {
        if tree.token_tag(index) != TokenTag::Identifier || index == *token {
            continue;
        }
        if tree.token_source(&handle.text, index) != name {
            continue;
        }
        let offset = tree.token_span(index).start;
        if analysis::position_context(&handle.text, tree.token_span(index).end)
            == PositionContext::Label
            && analysis::lookup_label(store, &decl.uri, name, offset).as_ref() == Some(decl)
        {
            locations.push(location_of(store, handle, index));
        }
    }
    locations
}

/// Rename every reference, grouped per document. Occurrences that already
/// carry the new name are dropped, so renaming to the current name is a
/// no-op.
pub fn rename_symbol(
    store: &DocumentStore,
    decl: &Declaration,
    new_name: &str,
) -> WorkspaceEdit {
    let locations = match decl.kind {
        DeclKind::Label { .. } => label_references(store, decl, true),
        _ => symbol_references(store, decl, true, false),
    };
    let mut changes: HashMap<Uri, Vec<TextEdit>> = HashMap::new();
    for location in locations {
        let unchanged = store.get_handle(&location.uri).is_some_and(|handle| {
            let span = crate::lsp::offsets::range_to_span(
                &handle.text,
                &location.range,
                store.encoding(),
            );
            &handle.text[span.start.min(handle.text.len())..span.end.min(handle.text.len())]
                == new_name
        });
        if unchanged {
            continue;
        }
        changes.entry(location.uri).or_default().push(TextEdit {
            range: location.range,
            new_text: new_name.to_string(),
        });
    }
    changes.retain(|_, edits| !edits.is_empty());
    for edits in changes.values_mut() {
        edits.sort_by_key(|edit| (edit.range.start.line, edit.range.start.character));
        edits.dedup_by_key(|edit| edit.range);
    }
    WorkspaceEdit {
        changes: Some(changes),
        ..Default::default()
    }
}

fn collect_in_handle(
    store: &DocumentStore,
    handle: &Handle,
    target: &Declaration,
    include_decl: bool,
    locations: &mut Vec<Location>,
) {
    let tree = &handle.tree;
    let decl_sites = declaration_sites(tree, &handle.uri);
    let target_name_token =
        (handle.uri == target.uri).then(|| analysis::decl_name_token(store, target)).flatten();

    for index in 0..tree.token_count() as TokenIndex {
        if tree.token_tag(index) != TokenTag::Identifier {
            continue;
        }
        let resolved = if let Some(site_decl) = decl_sites.get(&index) {
            Some(site_decl.clone())
        } else {
            resolve_occurrence(store, handle, index)
        };
        if resolved.as_ref() != Some(target) {
            continue;
        }
        let is_decl_site = target_name_token == Some(index) && handle.uri == target.uri;
        if is_decl_site && !include_decl {
            continue;
        }
        locations.push(location_of(store, handle, index));
    }
}

/// Resolution of one identifier occurrence, dispatched on its textual
/// position context.
pub(crate) fn resolve_occurrence(
    store: &DocumentStore,
    handle: &Handle,
    token: TokenIndex,
) -> Option<Declaration> {
    let tree = &handle.tree;
    let span = tree.token_span(token);
    let name = tree.token_source(&handle.text, token);
    match analysis::position_context(&handle.text, span.end) {
        PositionContext::FieldAccess(chain) => {
            analysis::resolve_chain_decl(store, &handle.uri, chain)
        }
        PositionContext::Label => analysis::lookup_label(store, &handle.uri, name, span.start),
        PositionContext::EnumLiteral
        | PositionContext::GlobalErrorSet
        | PositionContext::StringLiteral => None,
        _ => analysis::lookup_symbol_global(store, &handle.uri, name, span.start),
    }
}

/// Name tokens that *declare* something, mapped to the declaration they
/// introduce. These positions resolve to themselves rather than through
/// scope lookup.
pub(crate) fn declaration_sites(tree: &Ast, uri: &Uri) -> HashMap<TokenIndex, Declaration> {
    let mut sites = HashMap::new();
    let mut add = |token: TokenIndex, kind: DeclKind, sites: &mut HashMap<_, _>| {
        sites.insert(
            token,
            Declaration {
                uri: uri.clone(),
                kind,
            },
        );
    };
    for index in 0..tree.node_count() as NodeIndex {
        match tree.node_tag(index) {
            NodeTag::VarDecl => {
                if let Some(decl) = tree.var_decl(index) {
                    add(decl.name_token, DeclKind::AstNode(index), &mut sites);
                }
            }
            NodeTag::FnDecl => {
                if let Some(proto) = tree.fn_proto(index) {
                    if let Some(name_token) = proto.name_token {
                        add(name_token, DeclKind::AstNode(index), &mut sites);
                    }
                    for &param in &proto.params {
                        add(
                            tree.node(param).main_token,
                            DeclKind::Param {
                                fn_node: index,
                                param,
                            },
                            &mut sites,
                        );
                    }
                }
            }
            NodeTag::ContainerField => {
                if let Some(field) = tree.container_field(index) {
                    add(field.name_token, DeclKind::AstNode(index), &mut sites);
                }
            }
            NodeTag::If | NodeTag::While => {
                let data = tree.loop_data(index);
                let condition = tree.node(index).lhs;
                for token in [data.payload_token, data.index_payload_token]
                    .into_iter()
                    .flatten()
                {
                    add(
                        token,
                        DeclKind::PointerPayload { token, condition },
                        &mut sites,
                    );
                }
            }
            NodeTag::For => {
                let data = tree.loop_data(index);
                let array_expr = tree.node(index).lhs;
                if let Some(token) = data.payload_token {
                    add(
                        token,
                        DeclKind::ArrayPayload { token, array_expr },
                        &mut sites,
                    );
                }
                if let Some(token) = data.index_payload_token {
                    add(token, DeclKind::ArrayIndex { token }, &mut sites);
                }
            }
            NodeTag::Switch => {
                let operand = tree.node(index).lhs;
                for &prong in tree.extra_range(tree.node(index).rhs) {
                    let arrow = tree.node(prong).main_token;
                    if let Some(token) = tree.payload_token_after(arrow) {
                        add(
                            token,
                            DeclKind::SwitchPayload { token, operand },
                            &mut sites,
                        );
                    }
                }
            }
            _ => {}
        }
        if let Some(token) = tree.label_token(index) {
            add(
                token,
                DeclKind::Label {
                    token,
                    block: index,
                },
                &mut sites,
            );
        }
    }
    sites
}

fn is_std_handle(store: &DocumentStore, handle: &Handle) -> bool {
    let Some(lib_path) = store.config().zig_lib_path.as_ref() else {
        return false;
    };
    uri_to_path(&handle.uri)
        .map(|path| path.starts_with(lib_path))
        .unwrap_or(false)
}

fn location_of(store: &DocumentStore, handle: &Handle, token: TokenIndex) -> Location {
    let span = handle.tree.token_span(token);
    Location::new(
        handle.uri.clone(),
        span_to_range(&handle.text, span, store.encoding()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::lsp::uri::path_to_uri;
    use std::fs;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn fixture(files: &[(&str, &str)]) -> (TempDir, DocumentStore, Vec<Uri>) {
        let dir = tempdir().expect("tempdir");
        let mut uris = Vec::new();
        for (name, text) in files {
            let path = dir.path().join(name);
            fs::write(&path, text).expect("write fixture");
            uris.push(path_to_uri(&path).expect("uri"));
        }
        let mut store = DocumentStore::new(Arc::new(Config::default()));
        for (uri, (_, text)) in uris.iter().zip(files) {
            store.open_document(uri.clone(), text.to_string());
        }
        (dir, store, uris)
    }

    #[test]
    fn cross_file_references_count_every_call_site() {
        let a_src = "pub fn foo() void {}\n";
        let b_src = "const a = @import(\"a.zig\");\nfn bar() void {\n    a.foo();\n    a.foo();\n}\n";
        let (_dir, store, uris) = fixture(&[("a.zig", a_src), ("b.zig", b_src)]);

        let decl = analysis::lookup_symbol_global(&store, &uris[0], "foo", 8).expect("foo");
        let locations = symbol_references(&store, &decl, true, false);
        assert_eq!(locations.len(), 3);
        let in_a = locations.iter().filter(|l| l.uri == uris[0]).count();
        let in_b = locations.iter().filter(|l| l.uri == uris[1]).count();
        assert_eq!((in_a, in_b), (1, 2));
    }

    #[test]
    fn shadowing_locals_are_not_references() {
        let source = "const x = 1;\nfn f() void {\n    const x = 2;\n    _ = x;\n}\nfn g() i32 {\n    return x;\n}\n";
        let (_dir, store, uris) = fixture(&[("main.zig", source)]);
        let top = analysis::lookup_symbol_global(&store, &uris[0], "x", 0).expect("top x");
        let locations = symbol_references(&store, &top, true, false);
        // declaration + the use in g(); the shadowed block use is excluded
        assert_eq!(locations.len(), 2);
    }

    #[test]
    fn excluding_declaration_drops_the_decl_site() {
        let source = "fn foo() void {}\nfn bar() void {\n    foo();\n}\n";
        let (_dir, store, uris) = fixture(&[("main.zig", source)]);
        let decl = analysis::lookup_symbol_global(&store, &uris[0], "foo", 4).expect("foo");
        let with_decl = symbol_references(&store, &decl, true, false);
        let without = symbol_references(&store, &decl, false, false);
        assert_eq!(with_decl.len(), 2);
        assert_eq!(without.len(), 1);
    }

    #[test]
    fn rename_groups_edits_by_file() {
        let a_src = "pub fn foo() void {}\n";
        let b_src = "const a = @import(\"a.zig\");\nfn bar() void {\n    a.foo();\n    a.foo();\n}\n";
        let (_dir, store, uris) = fixture(&[("a.zig", a_src), ("b.zig", b_src)]);
        let decl = analysis::lookup_symbol_global(&store, &uris[0], "foo", 8).expect("foo");
        let edit = rename_symbol(&store, &decl, "bar2");
        let changes = edit.changes.expect("changes");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes.get(&uris[0]).map(Vec::len), Some(1));
        assert_eq!(changes.get(&uris[1]).map(Vec::len), Some(2));
        for edits in changes.values() {
            assert!(edits.iter().all(|e| e.new_text == "bar2"));
        }
    }

    #[test]
    fn field_references_resolve_through_chains() {
        let source = "const P = struct { x: i32 };\nfn f(p: P) i32 {\n    return p.x;\n}\n";
        let (_dir, store, uris) = fixture(&[("main.zig", source)]);
        let handle = store.get_handle(&uris[0]).unwrap();
        let container = handle.tree.var_decl(handle.tree.root_decls[0]).unwrap().init_node;
        let field =
            analysis::lookup_symbol_container(&store, &uris[0], container, "x", true).expect("x");
        let locations = symbol_references(&store, &field, true, false);
        assert_eq!(locations.len(), 2);
    }

    #[test]
    fn label_references_stay_in_function() {
        let source = "fn f() void {\n    outer: while (true) {\n        break :outer;\n    }\n}\n";
        let (_dir, store, uris) = fixture(&[("main.zig", source)]);
        let at = source.find(":outer;").unwrap() + 1;
        let decl = analysis::lookup_label(&store, &uris[0], "outer", at).expect("label");
        let locations = label_references(&store, &decl, true);
        assert_eq!(locations.len(), 2);
    }
}
