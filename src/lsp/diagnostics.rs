use crate::language::ast::{NodeIndex, NodeTag, NULL_NODE};
use crate::lsp::offsets::span_to_range;
use crate::lsp::store::{DocumentStore, Handle};
use tower_lsp_server::lsp_types::{Diagnostic, DiagnosticSeverity, Uri};

const SOURCE: &str = "zls";

/// Diagnostics published on open/change: parse errors always, style checks
/// when `warn_style` is configured.
pub fn collect_diagnostics(store: &DocumentStore, uri: &Uri, warn_style: bool) -> Vec<Diagnostic> {
    let Some(handle) = store.get_handle(uri) else {
        return Vec::new();
    };
    let mut diagnostics = parse_error_diagnostics(store, handle);
    if warn_style {
        diagnostics.extend(style_diagnostics(store, handle));
    }
    diagnostics
}

fn parse_error_diagnostics(store: &DocumentStore, handle: &Handle) -> Vec<Diagnostic> {
    let tree = &handle.tree;
    tree.errors
        .iter()
        .map(|error| {
            let span = if (error.token as usize) < tree.token_count() {
                tree.token_span(error.token)
            } else {
                crate::language::span::Span::new(0, 0)
            };
            Diagnostic {
                range: span_to_range(&handle.text, span, store.encoding()),
                severity: Some(DiagnosticSeverity::ERROR),
                source: Some(SOURCE.into()),
                message: tree.render_parse_error(error, &handle.text),
                ..Default::default()
            }
        })
        .collect()
}

/// Naming conventions: functions returning `type` are PascalCase, other
/// functions camelCase, fields snake_case. Reported at the name token.
fn style_diagnostics(store: &DocumentStore, handle: &Handle) -> Vec<Diagnostic> {
    let tree = &handle.tree;
    let mut diagnostics = Vec::new();
    for node in 0..tree.node_count() as NodeIndex {
        match tree.node_tag(node) {
            NodeTag::FnDecl => {
                let Some(proto) = tree.fn_proto(node) else {
                    continue;
                };
                let Some(name_token) = proto.name_token else {
                    continue;
                };
                let name = tree.token_source(&handle.text, name_token);
                let returns_type = proto.return_type != NULL_NODE
                    && tree.node_tag(proto.return_type) == NodeTag::Identifier
                    && tree.token_source(&handle.text, tree.node(proto.return_type).main_token)
                        == "type";
                let message = if returns_type {
                    (!is_pascal_case(name)).then_some("Type functions should be PascalCase")
                } else {
                    (!is_camel_case(name)).then_some("Functions should be camelCase")
                };
                if let Some(message) = message {
                    diagnostics.push(info_at(store, handle, name_token, message));
                }
            }
            NodeTag::ContainerField => {
                let Some(field) = tree.container_field(node) else {
                    continue;
                };
                let name = tree.token_source(&handle.text, field.name_token);
                if !is_snake_case(name) {
                    diagnostics.push(info_at(
                        store,
                        handle,
                        field.name_token,
                        "Fields should be snake_case",
                    ));
                }
            }
            _ => {}
        }
    }
    diagnostics
}

fn info_at(
    store: &DocumentStore,
    handle: &Handle,
    token: crate::language::ast::TokenIndex,
    message: &str,
) -> Diagnostic {
    Diagnostic {
        range: span_to_range(&handle.text, handle.tree.token_span(token), store.encoding()),
        severity: Some(DiagnosticSeverity::INFORMATION),
        source: Some(SOURCE.into()),
        message: message.to_string(),
        ..Default::default()
    }
}

fn is_camel_case(name: &str) -> bool {
    let name = name.trim_start_matches('_');
    !name.contains('_') && name.chars().next().is_none_or(|ch| ch.is_lowercase() || !ch.is_alphabetic())
}

fn is_pascal_case(name: &str) -> bool {
    let name = name.trim_start_matches('_');
    !name.contains('_') && name.chars().next().is_none_or(|ch| ch.is_uppercase())
}

fn is_snake_case(name: &str) -> bool {
    !name.chars().any(|ch| ch.is_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;
    use crate::lsp::uri::path_to_uri;

    fn store_with(source: &str) -> (tempfile::TempDir, DocumentStore, Uri) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("main.zig");
        fs::write(&path, source).expect("write");
        let uri = path_to_uri(&path).expect("uri");
        let mut store = DocumentStore::new(Arc::new(Config::default()));
        store.open_document(uri.clone(), source.to_string());
        (dir, store, uri)
    }

    #[test]
    fn parse_error_is_an_error_diagnostic() {
        let (_dir, store, uri) = store_with("fn (");
        let diagnostics = collect_diagnostics(&store, &uri, false);
        assert!(!diagnostics.is_empty());
        assert!(diagnostics
            .iter()
            .all(|d| d.severity == Some(DiagnosticSeverity::ERROR)));
        assert_eq!(diagnostics[0].source.as_deref(), Some("zls"));
    }

    #[test]
    fn clean_file_has_no_diagnostics() {
        let (_dir, store, uri) = store_with("fn main() void {}\n");
        assert!(collect_diagnostics(&store, &uri, true).is_empty());
    }

    #[test]
    fn style_checks_fire_only_when_enabled() {
        let source = "fn Bad_name() void {}\nfn list(comptime T: type) type {\n    return T;\n}\nconst S = struct { BadField: i32 };\n";
        let (_dir, store, uri) = store_with(source);
        assert!(collect_diagnostics(&store, &uri, false).is_empty());
        let diagnostics = collect_diagnostics(&store, &uri, true);
        assert_eq!(diagnostics.len(), 3);
        assert!(diagnostics
            .iter()
            .all(|d| d.severity == Some(DiagnosticSeverity::INFORMATION)));
        let messages: Vec<_> = diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert!(messages.contains(&"Functions should be camelCase"));
        assert!(messages.contains(&"Type functions should be PascalCase"));
        assert!(messages.contains(&"Fields should be snake_case"));
    }

    #[test]
    fn empty_file_has_no_diagnostics() {
        let (_dir, store, uri) = store_with("");
        assert!(collect_diagnostics(&store, &uri, true).is_empty());
    }
}
