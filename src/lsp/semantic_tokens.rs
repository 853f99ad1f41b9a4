use crate::language::ast::{NodeIndex, NodeTag, TokenIndex, NULL_NODE};
use crate::language::token::TokenTag;
use crate::lsp::analysis::{self, Declaration, DeclKind};
use crate::lsp::offsets::OffsetEncoding;
use crate::lsp::references;
use crate::lsp::store::{DocumentStore, Handle};
use std::collections::HashMap;
use tower_lsp_server::lsp_types::{
    SemanticToken, SemanticTokenModifier, SemanticTokenType, SemanticTokensLegend, Uri,
};

// Indices into the legend's token_types.
const TYPE_KEYWORD: u32 = 0;
const TYPE_NAMESPACE: u32 = 1;
const TYPE_TYPE: u32 = 2;
const TYPE_PARAMETER: u32 = 3;
const TYPE_VARIABLE: u32 = 4;
const TYPE_ENUM_MEMBER: u32 = 5;
const TYPE_FIELD: u32 = 6;
const TYPE_ERROR_TAG: u32 = 7;
const TYPE_FUNCTION: u32 = 8;
const TYPE_COMMENT: u32 = 9;
const TYPE_STRING: u32 = 10;
const TYPE_NUMBER: u32 = 11;
const TYPE_OPERATOR: u32 = 12;
const TYPE_BUILTIN: u32 = 13;
const TYPE_LABEL: u32 = 14;

// Modifier bits, in legend order.
const MOD_DECLARATION: u32 = 1 << 0;
const MOD_DEFINITION: u32 = 1 << 1;
const MOD_READONLY: u32 = 1 << 2;
const MOD_DOCUMENTATION: u32 = 1 << 9;

pub fn legend() -> SemanticTokensLegend {
    SemanticTokensLegend {
        token_types: vec![
            SemanticTokenType::KEYWORD,
            SemanticTokenType::NAMESPACE,
            SemanticTokenType::TYPE,
            SemanticTokenType::PARAMETER,
            SemanticTokenType::VARIABLE,
            SemanticTokenType::ENUM_MEMBER,
            SemanticTokenType::PROPERTY,
            SemanticTokenType::new("errorTag"),
            SemanticTokenType::FUNCTION,
            SemanticTokenType::COMMENT,
            SemanticTokenType::STRING,
            SemanticTokenType::NUMBER,
            SemanticTokenType::OPERATOR,
            SemanticTokenType::new("builtin"),
            SemanticTokenType::new("label"),
        ],
        token_modifiers: vec![
            SemanticTokenModifier::DECLARATION,
            SemanticTokenModifier::DEFINITION,
            SemanticTokenModifier::READONLY,
            SemanticTokenModifier::STATIC,
            SemanticTokenModifier::DEPRECATED,
            SemanticTokenModifier::ABSTRACT,
            SemanticTokenModifier::ASYNC,
            SemanticTokenModifier::MODIFICATION,
            SemanticTokenModifier::new("generic"),
            SemanticTokenModifier::DOCUMENTATION,
            SemanticTokenModifier::DEFAULT_LIBRARY,
        ],
    }
}

/// Full-document semantic tokens in LSP's delta encoding: five integers per
/// token, positions in the negotiated column unit.
pub fn semantic_tokens_full(store: &DocumentStore, uri: &Uri) -> Vec<SemanticToken> {
    let Some(handle) = store.get_handle(uri) else {
        return Vec::new();
    };
    let tree = &handle.tree;
    let text = &handle.text;
    let encoding = store.encoding();

    let literal_classes = literal_identifier_classes(handle);
    let decl_sites = references::declaration_sites(tree, uri);

    let mut raw: Vec<(usize, usize, u32, u32)> = Vec::new(); // (start, end, type, modifiers)
    for index in 0..tree.token_count() as TokenIndex {
        let tag = tree.token_tag(index);
        let span = tree.token_span(index);
        if span.is_empty() {
            continue;
        }
        let classified = match tag {
            TokenTag::LineComment => Some((TYPE_COMMENT, 0)),
            TokenTag::DocComment => Some((TYPE_COMMENT, MOD_DOCUMENTATION)),
            TokenTag::StringLiteral | TokenTag::CharLiteral => Some((TYPE_STRING, 0)),
            TokenTag::NumberLiteral => Some((TYPE_NUMBER, 0)),
            TokenTag::Builtin => Some((TYPE_BUILTIN, 0)),
            TokenTag::Identifier => {
                if let Some(&class) = literal_classes.get(&index) {
                    Some((class, 0))
                } else if let Some(decl) = decl_sites.get(&index) {
                    Some(classify_decl(store, decl, MOD_DECLARATION | MOD_DEFINITION))
                } else if analysis::is_primitive_name(tree.token_source(text, index)) {
                    Some((TYPE_TYPE, 0))
                } else if let Some(decl) = references::resolve_occurrence(store, handle, index) {
                    Some(classify_decl(store, &decl, 0))
                } else {
                    Some((TYPE_VARIABLE, 0))
                }
            }
            tag if tag.is_keyword() => Some((TYPE_KEYWORD, 0)),
            tag if tag.is_operator() => Some((TYPE_OPERATOR, 0)),
            _ => None,
        };
        if let Some((token_type, modifiers)) = classified {
            raw.push((span.start, span.end, token_type, modifiers));
        }
    }

    encode(text, &raw, encoding)
}

/// Identifier tokens whose class is fixed by the node that owns them: enum
/// literals, error values, labels.
fn literal_identifier_classes(handle: &Handle) -> HashMap<TokenIndex, u32> {
    let tree = &handle.tree;
    let mut classes = HashMap::new();
    for node in 0..tree.node_count() as NodeIndex {
        match tree.node_tag(node) {
            NodeTag::EnumLiteral => {
                classes.insert(tree.node(node).main_token, TYPE_ENUM_MEMBER);
            }
            NodeTag::ErrorValue => {
                classes.insert(tree.node(node).main_token, TYPE_ERROR_TAG);
            }
            NodeTag::ErrorSetDecl => {
                for &token in tree.extra_range(tree.node(node).lhs) {
                    classes.insert(token, TYPE_ERROR_TAG);
                }
            }
            NodeTag::Break | NodeTag::Continue => {
                let label = tree.node(node).lhs;
                if label != 0 {
                    classes.insert(label - 1, TYPE_LABEL);
                }
            }
            _ => {}
        }
        if let Some(token) = tree.label_token(node) {
            classes.insert(token, TYPE_LABEL);
        }
    }
    classes
}

fn classify_decl(store: &DocumentStore, decl: &Declaration, extra: u32) -> (u32, u32) {
    let Some(handle) = store.get_handle(&decl.uri) else {
        return (TYPE_VARIABLE, extra);
    };
    let tree = &handle.tree;
    match &decl.kind {
        DeclKind::AstNode(node) => match tree.node_tag(*node) {
            NodeTag::Root => (TYPE_NAMESPACE, extra),
            NodeTag::FnDecl => (TYPE_FUNCTION, extra),
            NodeTag::ContainerField => {
                let in_enum = analysis::find_container_of(tree, *node)
                    .map(|container| analysis::is_enum_container(store, &decl.uri, container))
                    .unwrap_or(false);
                if in_enum {
                    (TYPE_ENUM_MEMBER, extra)
                } else {
                    (TYPE_FIELD, extra)
                }
            }
            NodeTag::VarDecl => {
                let Some(var) = tree.var_decl(*node) else {
                    return (TYPE_VARIABLE, extra);
                };
                if var.init_node != NULL_NODE {
                    match tree.node_tag(var.init_node) {
                        NodeTag::ContainerDecl | NodeTag::ErrorSetDecl => {
                            return (TYPE_TYPE, extra);
                        }
                        NodeTag::BuiltinCall => return (TYPE_NAMESPACE, extra),
                        _ => {}
                    }
                }
                let readonly = if var.is_const { MOD_READONLY } else { 0 };
                (TYPE_VARIABLE, extra | readonly)
            }
            _ => (TYPE_VARIABLE, extra),
        },
        DeclKind::Param { .. } => (TYPE_PARAMETER, extra),
        DeclKind::Label { .. } => (TYPE_LABEL, extra),
        _ => (TYPE_VARIABLE, extra),
    }
}

/// Delta-encode spans into the protocol's flat quintuple stream.
fn encode(
    text: &str,
    raw: &[(usize, usize, u32, u32)],
    encoding: OffsetEncoding,
) -> Vec<SemanticToken> {
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(
            text.bytes()
                .enumerate()
                .filter(|(_, byte)| *byte == b'\n')
                .map(|(i, _)| i + 1),
        )
        .collect();
    let position_of = |offset: usize| -> (u32, u32) {
        let line = match line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let col = width(&text[line_starts[line]..offset], encoding);
        (line as u32, col)
    };

    let mut tokens = Vec::with_capacity(raw.len());
    let mut prev_line = 0u32;
    let mut prev_col = 0u32;
    for &(start, end, token_type, modifiers) in raw {
        let (line, col) = position_of(start.min(text.len()));
        let delta_line = line - prev_line;
        let delta_start = if delta_line == 0 { col - prev_col } else { col };
        tokens.push(SemanticToken {
            delta_line,
            delta_start,
            length: width(&text[start.min(text.len())..end.min(text.len())], encoding),
            token_type,
            token_modifiers_bitset: modifiers,
        });
        prev_line = line;
        prev_col = col;
    }
    tokens
}

fn width(slice: &str, encoding: OffsetEncoding) -> u32 {
    match encoding {
        OffsetEncoding::Utf8 => slice.len() as u32,
        OffsetEncoding::Utf16 => slice.chars().map(|ch| ch.len_utf16() as u32).sum(),
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

    fn tokens_for(source: &str) -> Vec<SemanticToken> {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("main.zig");
        fs::write(&path, source).expect("write");
        let uri = path_to_uri(&path).expect("uri");
        let mut store = DocumentStore::new(Arc::new(Config::default()));
        store.open_document(uri.clone(), source.to_string());
        let tokens = semantic_tokens_full(&store, &uri);
        drop(dir);
        tokens
    }

    #[test]
    fn legend_matches_type_indices() {
        let legend = legend();
        assert_eq!(legend.token_types.len(), 15);
        assert_eq!(legend.token_types[TYPE_FUNCTION as usize], SemanticTokenType::FUNCTION);
        assert_eq!(legend.token_modifiers.len(), 11);
    }

    #[test]
    fn deltas_reconstruct_absolute_positions() {
        let source = "const x = 1;\nfn foo() void {}\n";
        let tokens = tokens_for(source);
        assert!(!tokens.is_empty());
        // first token is `const` at 0:0
        assert_eq!(tokens[0].delta_line, 0);
        assert_eq!(tokens[0].delta_start, 0);
        assert_eq!(tokens[0].token_type, TYPE_KEYWORD);
        // reconstruct and check the `fn` keyword lands on line 1
        let mut line = 0u32;
        let mut found_fn = false;
        for token in &tokens {
            line += token.delta_line;
            if line == 1 && token.token_type == TYPE_KEYWORD {
                found_fn = true;
            }
        }
        assert!(found_fn);
    }

    #[test]
    fn declaration_names_carry_declaration_modifier() {
        let source = "fn foo() void {}\n";
        let tokens = tokens_for(source);
        let function = tokens
            .iter()
            .find(|token| token.token_type == TYPE_FUNCTION)
            .expect("function token");
        assert_ne!(function.token_modifiers_bitset & MOD_DECLARATION, 0);
    }

    #[test]
    fn classifies_literals_comments_and_enum_members() {
        let source = "/// doc\nconst Color = enum { red };\nconst c: Color = .red;\nconst s = \"hi\";\nconst n = 42;\n";
        let tokens = tokens_for(source);
        let types: Vec<u32> = tokens.iter().map(|t| t.token_type).collect();
        assert!(types.contains(&TYPE_COMMENT));
        assert!(types.contains(&TYPE_ENUM_MEMBER));
        assert!(types.contains(&TYPE_STRING));
        assert!(types.contains(&TYPE_NUMBER));
        assert!(types.contains(&TYPE_TYPE));
        let doc = tokens
            .iter()
            .find(|t| t.token_type == TYPE_COMMENT)
            .expect("doc token");
        assert_ne!(doc.token_modifiers_bitset & MOD_DOCUMENTATION, 0);
    }
}
