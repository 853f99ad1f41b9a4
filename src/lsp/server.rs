use super::backend::Backend;
use crate::config::Config;
use std::error::Error;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tower_lsp_server::{LspService, Server};

/// Run the language server over stdio until the client disconnects.
pub fn serve_stdio(config: Config, debug_log: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = Arc::new(config);
    let runtime = Runtime::new()?;
    runtime.block_on(async {
        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();
        let (service, socket) =
            LspService::new(move |client| Backend::new(client, config.clone(), debug_log));
        Server::new(stdin, stdout, socket).serve(service).await;
        Ok(())
    })
}
