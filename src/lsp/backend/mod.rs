use crate::config::Config;
use crate::lsp::analysis::{self, Declaration};
use crate::lsp::offsets::{full_range, position_to_offset, span_to_range};
use crate::lsp::references;
use crate::lsp::store::DocumentStore;
use crate::lsp::uri::uri_to_path;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_lsp_server::lsp_types::{Location, MessageType, Position, TextEdit, Uri};
use tower_lsp_server::Client;

mod server;

/// What the client told us during `initialize`; read-only afterwards.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ClientCaps {
    pub markdown: bool,
    pub snippets: bool,
}

/// All server state, threaded into every handler by the service.
pub struct Backend {
    client: Client,
    store: Arc<RwLock<DocumentStore>>,
    config: Arc<Config>,
    caps: Arc<RwLock<ClientCaps>>,
    debug_log: bool,
}

impl Backend {
    pub fn new(client: Client, config: Arc<Config>, debug_log: bool) -> Self {
        Self {
            client,
            store: Arc::new(RwLock::new(DocumentStore::new(config.clone()))),
            config,
            caps: Arc::new(RwLock::new(ClientCaps::default())),
            debug_log,
        }
    }

    async fn log_debug(&self, message: impl Into<String>) {
        if self.debug_log {
            let _ = self.client.log_message(MessageType::LOG, message.into()).await;
        }
    }

    async fn log_warning(&self, message: impl Into<String>) {
        let _ = self
            .client
            .log_message(MessageType::WARNING, message.into())
            .await;
    }

    async fn publish_diagnostics(&self, uri: &Uri) {
        let diagnostics = {
            let store = self.store.read().await;
            crate::lsp::diagnostics::collect_diagnostics(&store, uri, self.config.warn_style)
        };
        self.client
            .publish_diagnostics(uri.clone(), diagnostics, None)
            .await;
    }

    /// Byte offset of an LSP position inside a held document.
    async fn offset_in(&self, uri: &Uri, position: Position) -> Option<usize> {
        let store = self.store.read().await;
        let handle = store.get_handle(uri)?;
        Some(position_to_offset(&handle.text, position, store.encoding()))
    }

    /// Declaration under the cursor: a declaration-site name token resolves
    /// to itself, everything else goes through the position-context paths.
    fn symbol_at(store: &DocumentStore, uri: &Uri, offset: usize) -> Option<Declaration> {
        let handle = store.get_handle(uri)?;
        let token = handle.tree.token_at_offset(offset)?;
        if handle.tree.token_tag(token) != crate::language::token::TokenTag::Identifier {
            return None;
        }
        let sites = references::declaration_sites(&handle.tree, uri);
        if let Some(decl) = sites.get(&token) {
            return Some(decl.clone());
        }
        references::resolve_occurrence(store, handle, token)
    }

    fn decl_location(store: &DocumentStore, decl: &Declaration) -> Option<Location> {
        let span = analysis::decl_name_span(store, decl)?;
        let handle = store.get_handle(&decl.uri)?;
        Some(Location::new(
            decl.uri.clone(),
            span_to_range(&handle.text, span, store.encoding()),
        ))
    }

    /// Pipe the document through `zig fmt --stdin`. Any failure produces an
    /// empty edit list rather than an error.
    fn run_zig_fmt(&self, text: &str) -> Option<String> {
        let zig = self.config.resolved_zig_path()?;
        let mut child = Command::new(zig)
            .arg("fmt")
            .arg("--stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(text.as_bytes()).ok()?;
        }
        let output = child.wait_with_output().ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8(output.stdout).ok()
    }

    fn format_edits(&self, store: &DocumentStore, uri: &Uri) -> Option<Vec<TextEdit>> {
        let handle = store.get_handle(uri)?;
        let formatted = self.run_zig_fmt(&handle.text)?;
        if *handle.text == *formatted {
            return Some(Vec::new());
        }
        Some(vec![TextEdit {
            range: full_range(&handle.text, store.encoding()),
            new_text: formatted,
        }])
    }

    /// True when the URI refers to a file the server can hold; used to log
    /// NotFound conditions with the offending path.
    async fn describe_missing(&self, uri: &Uri) -> String {
        match uri_to_path(uri) {
            Ok(path) => format!("document not held: {}", path.display()),
            Err(_) => format!("document not held: {}", uri.as_str()),
        }
    }
}
