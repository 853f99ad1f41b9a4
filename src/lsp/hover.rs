use crate::language::ast::{NodeTag, NULL_NODE};
use crate::lsp::analysis::{self, Declaration, DeclKind};
use crate::lsp::builtins::builtins;
use crate::lsp::store::DocumentStore;
use tower_lsp_server::lsp_types::{Hover, HoverContents, MarkupContent, MarkupKind};

/// One-line source rendering of a declaration, shown in hover and as
/// completion detail.
pub fn decl_signature(store: &DocumentStore, decl: &Declaration) -> Option<String> {
    let handle = store.get_handle(&decl.uri)?;
    let tree = &handle.tree;
    let text = &handle.text;
    let slice = |span: crate::language::span::Span| -> String {
        text[span.start.min(text.len())..span.end.min(text.len())]
            .trim()
            .to_string()
    };
    match &decl.kind {
        DeclKind::AstNode(node) => match tree.node_tag(*node) {
            NodeTag::Root => None,
            NodeTag::FnDecl | NodeTag::FnProto => {
                let proto_node = match tree.node_tag(*node) {
                    NodeTag::FnDecl => tree.node(*node).lhs,
                    _ => *node,
                };
                Some(slice(tree.node_span(proto_node)))
            }
            NodeTag::VarDecl => {
                let var = tree.var_decl(*node)?;
                if var.init_node != NULL_NODE
                    && tree.node_tag(var.init_node) == NodeTag::ContainerDecl
                {
                    // cut the body off: `const P = struct`
                    let keyword = tree.node(var.init_node).main_token;
                    let span = crate::language::span::Span::new(
                        tree.token_span(var.mut_token).start,
                        tree.token_span(keyword).end,
                    );
                    return Some(slice(span));
                }
                Some(slice(tree.node_span(*node)).trim_end_matches(';').trim_end().to_string())
            }
            NodeTag::ContainerField => Some(slice(tree.node_span(*node))),
            _ => Some(slice(tree.node_span(*node))),
        },
        DeclKind::Param { param, .. } => Some(slice(tree.node_span(*param))),
        DeclKind::PointerPayload { token, .. }
        | DeclKind::ArrayPayload { token, .. }
        | DeclKind::ArrayIndex { token }
        | DeclKind::SwitchPayload { token, .. }
        | DeclKind::Label { token, .. } => Some(slice(tree.token_span(*token))),
    }
}

/// Hover contents for a resolved declaration: signature plus doc comment,
/// rendered as Markdown when the client can take it.
pub fn hover_for_decl(store: &DocumentStore, decl: &Declaration, markdown: bool) -> Option<Hover> {
    let signature = decl_signature(store, decl)?;
    let docs = analysis::doc_comments(store, decl);
    Some(render(&signature, docs.as_deref(), markdown))
}

/// Hover for a `@builtin` under the cursor.
pub fn hover_for_builtin(name: &str, markdown: bool) -> Option<Hover> {
    let builtin = builtins().iter().find(|builtin| builtin.name == name)?;
    Some(render(
        builtin.signature,
        Some(builtin.documentation),
        markdown,
    ))
}

fn render(signature: &str, docs: Option<&str>, markdown: bool) -> Hover {
    let value = if markdown {
        match docs {
            Some(docs) if !docs.is_empty() => {
                format!("```zig\n{signature}\n```\n\n{docs}")
            }
            _ => format!("```zig\n{signature}\n```"),
        }
    } else {
        match docs {
            Some(docs) if !docs.is_empty() => format!("{signature}\n{docs}"),
            _ => signature.to_string(),
        }
    };
    Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: if markdown {
                MarkupKind::Markdown
            } else {
                MarkupKind::PlainText
            },
            value,
        }),
        range: None,
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

    fn one_file(source: &str) -> (tempfile::TempDir, DocumentStore, tower_lsp_server::lsp_types::Uri) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("main.zig");
        fs::write(&path, source).expect("write");
        let uri = path_to_uri(&path).expect("uri");
        let mut store = DocumentStore::new(Arc::new(Config::default()));
        store.open_document(uri.clone(), source.to_string());
        (dir, store, uri)
    }

    #[test]
    fn function_signature_matches_source() {
        let source = "fn add(a: i32, b: i32) i32 { return a + b; }\n";
        let (_dir, store, uri) = one_file(source);
        let decl = analysis::lookup_symbol_global(&store, &uri, "add", 0).expect("add");
        assert_eq!(
            decl_signature(&store, &decl).as_deref(),
            Some("fn add(a: i32, b: i32) i32")
        );
    }

    #[test]
    fn container_const_signature_stops_at_keyword() {
        let source = "pub const Point = struct {\n    x: i32,\n};\n";
        let (_dir, store, uri) = one_file(source);
        let decl = analysis::lookup_symbol_global(&store, &uri, "Point", 0).expect("Point");
        assert_eq!(
            decl_signature(&store, &decl).as_deref(),
            Some("const Point = struct")
        );
    }

    #[test]
    fn hover_includes_doc_comment_as_markdown() {
        let source = "/// Adds numbers.\nfn add(a: i32, b: i32) i32 { return a + b; }\n";
        let (_dir, store, uri) = one_file(source);
        let decl = analysis::lookup_symbol_global(&store, &uri, "add", 30).expect("add");
        let hover = hover_for_decl(&store, &decl, true).expect("hover");
        let HoverContents::Markup(markup) = hover.contents else {
            panic!("expected markup");
        };
        assert_eq!(markup.kind, MarkupKind::Markdown);
        assert!(markup.value.contains("fn add(a: i32, b: i32) i32"));
        assert!(markup.value.contains("Adds numbers."));
    }

    #[test]
    fn builtin_hover_uses_precomputed_docs() {
        let hover = hover_for_builtin("@import", false).expect("hover");
        let HoverContents::Markup(markup) = hover.contents else {
            panic!("expected markup");
        };
        assert_eq!(markup.kind, MarkupKind::PlainText);
        assert!(markup.value.contains("@import(comptime path"));
    }
}
