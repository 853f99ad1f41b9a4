use crate::language::ast::{Ast, NodeIndex, NodeTag, TokenIndex, NULL_NODE};
use crate::lsp::offsets::{span_to_range, OffsetEncoding};
use crate::lsp::store::{DocumentStore, Handle};
use tower_lsp_server::lsp_types::{DocumentSymbol, SymbolKind, Uri};

/// Hierarchical outline: one node per top-level declaration, with container
/// members as children.
pub fn document_symbols(store: &DocumentStore, uri: &Uri) -> Vec<DocumentSymbol> {
    let Some(handle) = store.get_handle(uri) else {
        return Vec::new();
    };
    let encoding = store.encoding();
    handle
        .tree
        .root_decls()
        .filter_map(|decl| symbol_for_node(handle, decl, encoding))
        .collect()
}

fn symbol_for_node(
    handle: &Handle,
    node: NodeIndex,
    encoding: OffsetEncoding,
) -> Option<DocumentSymbol> {
    let tree = &handle.tree;
    let (name_token, kind, children_of) = classify(tree, node)?;
    let name = tree.token_source(&handle.text, name_token).to_string();
    let children: Vec<DocumentSymbol> = children_of
        .map(|container| {
            tree.container_members(container)
                .iter()
                .filter_map(|&member| symbol_for_node(handle, member, encoding))
                .collect()
        })
        .unwrap_or_default();
    #[allow(deprecated)]
    Some(DocumentSymbol {
        name,
        detail: None,
        kind,
        tags: None,
        deprecated: None,
        range: span_to_range(&handle.text, tree.node_span(node), encoding),
        selection_range: span_to_range(&handle.text, tree.token_span(name_token), encoding),
        children: (!children.is_empty()).then_some(children),
    })
}

fn classify(tree: &Ast, node: NodeIndex) -> Option<(TokenIndex, SymbolKind, Option<NodeIndex>)> {
    match tree.node_tag(node) {
        NodeTag::FnDecl => {
            let proto = tree.fn_proto(node)?;
            Some((proto.name_token?, SymbolKind::FUNCTION, None))
        }
        NodeTag::VarDecl => {
            let var = tree.var_decl(node)?;
            if var.init_node != NULL_NODE
                && tree.node_tag(var.init_node) == NodeTag::ContainerDecl
            {
                let kind = match tree.token_tag(tree.node(var.init_node).main_token) {
                    crate::language::token::TokenTag::KeywordEnum => SymbolKind::ENUM,
                    _ => SymbolKind::STRUCT,
                };
                return Some((var.name_token, kind, Some(var.init_node)));
            }
            let kind = if var.is_const {
                SymbolKind::CONSTANT
            } else {
                SymbolKind::VARIABLE
            };
            Some((var.name_token, kind, None))
        }
        NodeTag::ContainerField => {
            let field = tree.container_field(node)?;
            Some((field.name_token, SymbolKind::FIELD, None))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::lsp::uri::path_to_uri;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn outline_nests_container_members() {
        let source = "const Point = struct {\n    x: i32,\n    y: i32,\n    pub fn len(self: Point) i32 {\n        return self.x;\n    }\n};\nvar counter: i32 = 0;\nfn reset() void {}\n";
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("main.zig");
        fs::write(&path, source).expect("write");
        let uri = path_to_uri(&path).expect("uri");
        let mut store = DocumentStore::new(Arc::new(Config::default()));
        store.open_document(uri.clone(), source.to_string());

        let symbols = document_symbols(&store, &uri);
        assert_eq!(symbols.len(), 3);
        assert_eq!(symbols[0].name, "Point");
        assert_eq!(symbols[0].kind, SymbolKind::STRUCT);
        let children = symbols[0].children.as_ref().expect("children");
        let names: Vec<_> = children.iter().map(|child| child.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "len"]);
        assert_eq!(children[2].kind, SymbolKind::FUNCTION);
        assert_eq!(symbols[1].name, "counter");
        assert_eq!(symbols[1].kind, SymbolKind::VARIABLE);
        assert_eq!(symbols[2].kind, SymbolKind::FUNCTION);
        assert!(symbols[0].range.start.line <= symbols[0].selection_range.start.line);
    }

    #[test]
    fn enum_container_gets_enum_kind() {
        let source = "const Color = enum {\n    red,\n    green,\n};\n";
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("main.zig");
        fs::write(&path, source).expect("write");
        let uri = path_to_uri(&path).expect("uri");
        let mut store = DocumentStore::new(Arc::new(Config::default()));
        store.open_document(uri.clone(), source.to_string());

        let symbols = document_symbols(&store, &uri);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].kind, SymbolKind::ENUM);
        let children = symbols[0].children.as_ref().expect("variants");
        let names: Vec<_> = children.iter().map(|child| child.name.as_str()).collect();
        assert_eq!(names, vec!["red", "green"]);
        assert!(children
            .iter()
            .all(|child| child.kind == SymbolKind::FIELD));
    }

    #[test]
    fn empty_file_yields_no_symbols() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("main.zig");
        fs::write(&path, "").expect("write");
        let uri = path_to_uri(&path).expect("uri");
        let mut store = DocumentStore::new(Arc::new(Config::default()));
        store.open_document(uri.clone(), String::new());
        assert!(document_symbols(&store, &uri).is_empty());
    }
}
