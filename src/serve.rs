//! Static file server for the distribution tree.

use axum::Router;
use camino::Utf8Path;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

/// Serves `dist` on `host:port`, blocking the calling thread. Directory
/// requests get their `index.html`, there is no directory listing.
pub fn serve(dist: &Utf8Path, host: &str, port: u16) -> anyhow::Result<()> {
    if !dist.is_dir() {
        anyhow::bail!("Nothing to serve, '{dist}' does not exist. Run a build first.");
    }

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(run(dist, host, port))
}

async fn run(dist: &Utf8Path, host: &str, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    let address = listener.local_addr()?;

    let router = Router::new().fallback_service(ServeDir::new(dist));

    info!(url = %style(format!("http://{address}/")).yellow(), "serving {dist}");
    axum::serve(listener, router).await?;

    Ok(())
}
