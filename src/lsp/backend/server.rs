use super::{Backend, ClientCaps};
use crate::language::token::TokenTag;
use crate::lsp::analysis;
use crate::lsp::completion::{completion_items, CompletionSettings};
use crate::lsp::hover::{hover_for_builtin, hover_for_decl};
use crate::lsp::offsets::OffsetEncoding;
use crate::lsp::references::{label_references, rename_symbol, symbol_references};
use crate::lsp::semantic_tokens;
use crate::lsp::symbols::document_symbols;
use tower_lsp_server::jsonrpc::Result as RpcResult;
use tower_lsp_server::lsp_types::request::{
    GotoDeclarationParams, GotoDeclarationResponse, GotoImplementationParams,
    GotoTypeDefinitionParams,
};
use tower_lsp_server::lsp_types::{
    CompletionOptions, CompletionParams, CompletionResponse, DeclarationCapability,
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, DocumentFormattingParams, DocumentSymbolParams,
    DocumentSymbolResponse, GotoDefinitionParams, GotoDefinitionResponse, Hover, HoverParams,
    HoverProviderCapability, ImplementationProviderCapability, InitializeParams, InitializeResult,
    InitializedParams, Location, MarkupKind, MessageType, OneOf, PositionEncodingKind,
    ReferenceParams, RenameParams, SemanticTokens, SemanticTokensFullOptions,
    SemanticTokensOptions, SemanticTokensParams, SemanticTokensResult,
    SemanticTokensServerCapabilities, ServerCapabilities, TextDocumentSyncCapability,
    TextDocumentSyncKind, TextEdit, TypeDefinitionProviderCapability, WillSaveTextDocumentParams,
    WorkspaceEdit,
};
use tower_lsp_server::LanguageServer;

impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> RpcResult<InitializeResult> {
        let offered_utf8 = params
            .capabilities
            .general
            .as_ref()
            .and_then(|general| general.position_encodings.as_ref())
            .is_some_and(|encodings| encodings.contains(&PositionEncodingKind::UTF8));
        let encoding = if offered_utf8 {
            OffsetEncoding::Utf8
        } else {
            OffsetEncoding::Utf16
        };
        self.store.write().await.set_encoding(encoding);

        let text_caps = params.capabilities.text_document.as_ref();
        let markdown = text_caps
            .and_then(|caps| caps.hover.as_ref())
            .and_then(|hover| hover.content_format.as_ref())
            .is_some_and(|formats| formats.contains(&MarkupKind::Markdown));
        let snippets = text_caps
            .and_then(|caps| caps.completion.as_ref())
            .and_then(|completion| completion.completion_item.as_ref())
            .and_then(|item| item.snippet_support)
            .unwrap_or(false);
        *self.caps.write().await = ClientCaps { markdown, snippets };

        let semantic_tokens_provider = self.config.enable_semantic_tokens.then(|| {
            SemanticTokensServerCapabilities::SemanticTokensOptions(SemanticTokensOptions {
                legend: semantic_tokens::legend(),
                full: Some(SemanticTokensFullOptions::Bool(true)),
                range: Some(false),
                work_done_progress_options: Default::default(),
            })
        });

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                position_encoding: Some(if offered_utf8 {
                    PositionEncodingKind::UTF8
                } else {
                    PositionEncodingKind::UTF16
                }),
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec![".".into(), "@".into(), ":".into()]),
                    ..Default::default()
                }),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                definition_provider: Some(OneOf::Left(true)),
                declaration_provider: Some(DeclarationCapability::Simple(true)),
                type_definition_provider: Some(TypeDefinitionProviderCapability::Simple(true)),
                implementation_provider: Some(ImplementationProviderCapability::Simple(true)),
                references_provider: Some(OneOf::Left(true)),
                document_symbol_provider: Some(OneOf::Left(true)),
                rename_provider: Some(OneOf::Left(true)),
                document_formatting_provider: Some(OneOf::Left(true)),
                semantic_tokens_provider,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        let _ = self
            .client
            .log_message(MessageType::INFO, "zls language server ready")
            .await;
    }

    async fn shutdown(&self) -> RpcResult<()> {
        self.log_debug("shutdown requested").await;
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        {
            let mut store = self.store.write().await;
            store.open_document(uri.clone(), params.text_document.text);
        }
        self.publish_diagnostics(&uri).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        {
            let mut store = self.store.write().await;
            store.apply_changes(&uri, &params.content_changes);
        }
        self.publish_diagnostics(&uri).await;
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        self.store.write().await.apply_save(&uri);
        self.publish_diagnostics(&uri).await;
    }

    async fn will_save(&self, params: WillSaveTextDocumentParams) {
        self.log_debug(format!(
            "will save {}",
            params.text_document.uri.as_str()
        ))
        .await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.store.write().await.close_document(&uri);
        self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn completion(&self, params: CompletionParams) -> RpcResult<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let Some(offset) = self.offset_in(&uri, position).await else {
            self.log_warning(self.describe_missing(&uri).await).await;
            return Ok(None);
        };
        let caps = *self.caps.read().await;
        let settings = CompletionSettings {
            snippets: caps.snippets && self.config.enable_snippets,
            markdown: caps.markdown,
            operator_completions: self.config.operator_completions,
        };
        let store = self.store.read().await;
        let items = completion_items(&store, &uri, offset, settings);
        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(CompletionResponse::Array(items)))
    }

    async fn hover(&self, params: HoverParams) -> RpcResult<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(offset) = self.offset_in(&uri, position).await else {
            self.log_warning(self.describe_missing(&uri).await).await;
            return Ok(None);
        };
        let markdown = self.caps.read().await.markdown;
        let store = self.store.read().await;
        let Some(handle) = store.get_handle(&uri) else {
            return Ok(None);
        };
        if let Some(token) = handle.tree.token_at_offset(offset) {
            if handle.tree.token_tag(token) == TokenTag::Builtin {
                let name = handle.tree.token_source(&handle.text, token).to_string();
                return Ok(hover_for_builtin(&name, markdown));
            }
        }
        let Some(decl) = Backend::symbol_at(&store, &uri, offset) else {
            return Ok(None);
        };
        Ok(hover_for_decl(&store, &decl, markdown))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> RpcResult<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(offset) = self.offset_in(&uri, position).await else {
            self.log_warning(self.describe_missing(&uri).await).await;
            return Ok(None);
        };
        let store = self.store.read().await;
        let Some(decl) = Backend::symbol_at(&store, &uri, offset) else {
            return Ok(None);
        };
        // definition follows aliases, declaration does not
        let target = analysis::resolve_alias(&store, &decl).unwrap_or(decl);
        Ok(Backend::decl_location(&store, &target).map(GotoDefinitionResponse::Scalar))
    }

    async fn goto_declaration(
        &self,
        params: GotoDeclarationParams,
    ) -> RpcResult<Option<GotoDeclarationResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(offset) = self.offset_in(&uri, position).await else {
            self.log_warning(self.describe_missing(&uri).await).await;
            return Ok(None);
        };
        let store = self.store.read().await;
        let Some(decl) = Backend::symbol_at(&store, &uri, offset) else {
            return Ok(None);
        };
        Ok(Backend::decl_location(&store, &decl).map(GotoDeclarationResponse::Scalar))
    }

    async fn goto_type_definition(
        &self,
        params: GotoTypeDefinitionParams,
    ) -> RpcResult<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(offset) = self.offset_in(&uri, position).await else {
            self.log_warning(self.describe_missing(&uri).await).await;
            return Ok(None);
        };
        let store = self.store.read().await;
        let Some(decl) = Backend::symbol_at(&store, &uri, offset) else {
            return Ok(None);
        };
        let Some(ty) = analysis::resolve_decl_type(&store, &decl, 0) else {
            return Ok(None);
        };
        let Some((container_uri, container_node)) = analysis::container_of_type(&store, &ty)
        else {
            return Ok(None);
        };
        let container_decl = analysis::Declaration {
            uri: container_uri,
            kind: analysis::DeclKind::AstNode(container_node),
        };
        Ok(Backend::decl_location(&store, &container_decl)
            .or_else(|| {
                // containers without a name token: jump to their first token
                let handle = store.get_handle(&container_decl.uri)?;
                let span = handle.tree.node_span(container_node);
                Some(Location::new(
                    container_decl.uri.clone(),
                    crate::lsp::offsets::span_to_range(
                        &handle.text,
                        crate::language::span::Span::new(span.start, span.start),
                        store.encoding(),
                    ),
                ))
            })
            .map(GotoDefinitionResponse::Scalar))
    }

    async fn goto_implementation(
        &self,
        params: GotoImplementationParams,
    ) -> RpcResult<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(offset) = self.offset_in(&uri, position).await else {
            self.log_warning(self.describe_missing(&uri).await).await;
            return Ok(None);
        };
        let store = self.store.read().await;
        let Some(decl) = Backend::symbol_at(&store, &uri, offset) else {
            return Ok(None);
        };
        let target = analysis::resolve_alias(&store, &decl).unwrap_or(decl);
        Ok(Backend::decl_location(&store, &target).map(GotoDefinitionResponse::Scalar))
    }

    async fn references(&self, params: ReferenceParams) -> RpcResult<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let include_decl = params.context.include_declaration;
        let Some(offset) = self.offset_in(&uri, position).await else {
            self.log_warning(self.describe_missing(&uri).await).await;
            return Ok(None);
        };
        let store = self.store.read().await;
        let Some(decl) = Backend::symbol_at(&store, &uri, offset) else {
            return Ok(None);
        };
        let locations = match decl.kind {
            analysis::DeclKind::Label { .. } => label_references(&store, &decl, include_decl),
            _ => symbol_references(
                &store,
                &decl,
                include_decl,
                self.config.skip_std_references,
            ),
        };
        if locations.is_empty() {
            return Ok(None);
        }
        Ok(Some(locations))
    }

    async fn rename(&self, params: RenameParams) -> RpcResult<Option<WorkspaceEdit>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let new_name = params.new_name;
        if new_name.is_empty() || !is_valid_identifier(&new_name) {
            return Ok(None);
        }
        let Some(offset) = self.offset_in(&uri, position).await else {
            self.log_warning(self.describe_missing(&uri).await).await;
            return Ok(None);
        };
        let store = self.store.read().await;
        let Some(decl) = Backend::symbol_at(&store, &uri, offset) else {
            return Ok(None);
        };
        Ok(Some(rename_symbol(&store, &decl, &new_name)))
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> RpcResult<Option<DocumentSymbolResponse>> {
        let store = self.store.read().await;
        let symbols = document_symbols(&store, &params.text_document.uri);
        Ok(Some(DocumentSymbolResponse::Nested(symbols)))
    }

    async fn formatting(
        &self,
        params: DocumentFormattingParams,
    ) -> RpcResult<Option<Vec<TextEdit>>> {
        let store = self.store.read().await;
        Ok(self.format_edits(&store, &params.text_document.uri))
    }

    async fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
    ) -> RpcResult<Option<SemanticTokensResult>> {
        if !self.config.enable_semantic_tokens {
            return Ok(None);
        }
        let store = self.store.read().await;
        let data = semantic_tokens::semantic_tokens_full(&store, &params.text_document.uri);
        Ok(Some(SemanticTokensResult::Tokens(SemanticTokens {
            result_id: None,
            data,
        })))
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validation_rejects_operators() {
        assert!(is_valid_identifier("renamed"));
        assert!(is_valid_identifier("_private0"));
        assert!(!is_valid_identifier("3start"));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier(""));
    }
}
