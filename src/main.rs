use std::sync::Arc;

use embedls::{create_service, ComponentLanguage, ServiceConfig};
use tower_lsp::Server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("EMBEDLS_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("starting embedls v{}", env!("CARGO_PKG_VERSION"));

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let config = ServiceConfig::new().language("component", Arc::new(ComponentLanguage::new()));
    let (service, socket) = create_service(config);
    Server::new(stdin, stdout, socket).serve(service).await;
}
