//! End-to-end scenarios driven through the store, analysis, and feature
//! layers, with documents living on disk the way an editor session would
//! leave them.

use crate::config::Config;
use crate::lsp::analysis::{self, PositionContext};
use crate::lsp::diagnostics::collect_diagnostics;
use crate::lsp::hover::hover_for_decl;
use crate::lsp::offsets::{range_to_span, OffsetEncoding};
use crate::lsp::references::{rename_symbol, symbol_references};
use crate::lsp::store::DocumentStore;
use crate::lsp::symbols::document_symbols;
use crate::lsp::uri::path_to_uri;
use crate::lsp::completion::{completion_items, CompletionSettings};
use std::fs;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tower_lsp_server::lsp_types::{DiagnosticSeverity, HoverContents, TextEdit, Uri};

fn open_fixture(files: &[(&str, &str)]) -> (TempDir, DocumentStore, Vec<Uri>) {
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

fn apply_edits(text: &str, edits: &[TextEdit]) -> String {
    let mut spans: Vec<(usize, usize, String)> = edits
        .iter()
        .map(|edit| {
            let span = range_to_span(text, &edit.range, OffsetEncoding::Utf16);
            (span.start, span.end, edit.new_text.clone())
        })
        .collect();
    spans.sort_by_key(|(start, _, _)| *start);
    let mut out = String::new();
    let mut cursor = 0;
    for (start, end, new_text) in spans {
        out.push_str(&text[cursor..start]);
        out.push_str(&new_text);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[test]
fn s1_hover_on_a_function_shows_its_signature() {
    let source = "fn add(a: i32, b: i32) i32 { return a + b; }\n";
    let (_dir, store, uris) = open_fixture(&[("main.zig", source)]);
    let offset = source.find("add").unwrap() + 1;
    let decl = analysis::lookup_symbol_global(&store, &uris[0], "add", offset).expect("add");
    let hover = hover_for_decl(&store, &decl, true).expect("hover");
    let HoverContents::Markup(markup) = hover.contents else {
        panic!("expected markup contents");
    };
    assert!(
        markup.value.contains("fn add(a: i32, b: i32) i32"),
        "{}",
        markup.value
    );
}

#[test]
fn s2_goto_definition_follows_alias_into_other_file() {
    let a_src = "pub const X = struct { y: i32 };\n";
    let b_src = "const A = @import(\"a.zig\");\nconst Z = A.X;\n";
    let (_dir, store, uris) = open_fixture(&[("a.zig", a_src), ("b.zig", b_src)]);

    let z_offset = b_src.find("const Z").unwrap() + "const ".len();
    let z = analysis::lookup_symbol_global(&store, &uris[1], "Z", z_offset + 1).expect("Z");
    let target = analysis::resolve_alias(&store, &z).expect("alias target");
    assert!(target.uri.as_str().ends_with("a.zig"));
    let span = analysis::decl_name_span(&store, &target).expect("span");
    let handle = store.get_handle(&target.uri).unwrap();
    let range = crate::lsp::offsets::span_to_range(&handle.text, span, store.encoding());
    assert_eq!(range.start.line, 0);

    // declaration does not follow the alias
    let decl_span = analysis::decl_name_span(&store, &z).expect("decl span");
    assert_eq!(
        &b_src[decl_span.start..decl_span.end],
        "Z",
        "goto-declaration stays on the alias"
    );
}

#[test]
fn s3_references_across_files_count_exactly_three() {
    let a_src = "pub fn foo() void {}\n";
    let b_src = "const a = @import(\"a.zig\");\nfn use_it() void {\n    a.foo();\n    a.foo();\n}\n";
    let (_dir, store, uris) = open_fixture(&[("a.zig", a_src), ("b.zig", b_src)]);
    let decl = analysis::lookup_symbol_global(&store, &uris[0], "foo", 8).expect("foo");
    let locations = symbol_references(&store, &decl, true, false);
    assert_eq!(locations.len(), 3);
    assert_eq!(locations.iter().filter(|l| l.uri == uris[0]).count(), 1);
    assert_eq!(locations.iter().filter(|l| l.uri == uris[1]).count(), 2);
}

#[test]
fn s4_rename_produces_grouped_edits_and_preserves_references() {
    let a_src = "pub fn foo() void {}\n";
    let b_src = "const a = @import(\"a.zig\");\nfn use_it() void {\n    a.foo();\n    a.foo();\n}\n";
    let (dir, store, uris) = open_fixture(&[("a.zig", a_src), ("b.zig", b_src)]);
    let decl = analysis::lookup_symbol_global(&store, &uris[0], "foo", 8).expect("foo");
    let edit = rename_symbol(&store, &decl, "bar");
    let changes = edit.changes.expect("changes");
    assert_eq!(changes.len(), 2);
    assert_eq!(changes.get(&uris[0]).map(Vec::len), Some(1));
    assert_eq!(changes.get(&uris[1]).map(Vec::len), Some(2));

    // apply the edits and re-run the references query on the new program
    let a_renamed = apply_edits(a_src, changes.get(&uris[0]).unwrap());
    let b_renamed = apply_edits(b_src, changes.get(&uris[1]).unwrap());
    assert!(a_renamed.contains("pub fn bar()"));
    fs::write(dir.path().join("a.zig"), &a_renamed).unwrap();
    fs::write(dir.path().join("b.zig"), &b_renamed).unwrap();

    let mut store2 = DocumentStore::new(Arc::new(Config::default()));
    store2.open_document(uris[0].clone(), a_renamed);
    store2.open_document(uris[1].clone(), b_renamed);
    let renamed = analysis::lookup_symbol_global(&store2, &uris[0], "bar", 8).expect("bar");
    assert_eq!(symbol_references(&store2, &renamed, true, false).len(), 3);

    // renaming to the name it already has is a no-op
    let idempotent = rename_symbol(&store2, &renamed, "bar");
    assert!(idempotent.changes.unwrap_or_default().is_empty());
}

#[test]
fn s5_parse_error_yields_one_error_diagnostic() {
    let source = "fn (";
    let (_dir, store, uris) = open_fixture(&[("main.zig", source)]);
    let diagnostics = collect_diagnostics(&store, &uris[0], false);
    assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
    assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::ERROR));
    assert_eq!(diagnostics[0].source.as_deref(), Some("zls"));
}

#[test]
fn s6_completion_after_dot_lists_struct_fields() {
    let source = "const P = struct { x: i32, y: i32 };\nvar p: P = undefined;\nfn f() void {\n    p.\n}\n";
    let (_dir, store, uris) = open_fixture(&[("main.zig", source)]);
    let offset = source.find("p.\n").unwrap() + 2;
    let items = completion_items(&store, &uris[0], offset, CompletionSettings::default());
    let mut labels: Vec<_> = items.iter().map(|item| item.label.clone()).collect();
    labels.sort();
    assert_eq!(labels, vec!["x", "y"]);
}

#[test]
fn empty_file_features_return_empty_results() {
    let (_dir, store, uris) = open_fixture(&[("main.zig", "")]);
    assert!(collect_diagnostics(&store, &uris[0], true).is_empty());
    assert!(document_symbols(&store, &uris[0]).is_empty());
    // completions at offset 0 fall back to the (empty) global scope
    assert_eq!(
        analysis::position_context("", 0),
        PositionContext::Empty
    );
    let items = completion_items(&store, &uris[0], 0, CompletionSettings::default());
    assert!(items.is_empty());
}

#[test]
fn broken_file_still_answers_other_queries() {
    let source = "fn (";
    let (_dir, store, uris) = open_fixture(&[("main.zig", source)]);
    assert!(document_symbols(&store, &uris[0]).is_empty());
    let items = completion_items(&store, &uris[0], 0, CompletionSettings::default());
    let _ = items;
    assert!(analysis::lookup_symbol_global(&store, &uris[0], "anything", 0).is_none());
}
