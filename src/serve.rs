//! Static file server for watch-mode sites.

use std::path::PathBuf;

use axum::Router;
use tower_http::services::ServeDir;
use tracing::{info, warn};

pub const PORT: u16 = 8000;

/// Serves `dist` on localhost without blocking the caller. The server task
/// lives until the process exits; watch mode is the only consumer.
pub fn spawn(dist: PathBuf) {
    tokio::spawn(async move {
        let app = Router::new().fallback_service(ServeDir::new(&dist));
        let listener = match tokio::net::TcpListener::bind(("127.0.0.1", PORT)).await {
            Ok(listener) => listener,
            Err(err) => {
                warn!("could not bind port {PORT}: {err}");
                return;
            }
        };
        info!(dist = %dist.display(), "serving on http://localhost:{PORT}");
        if let Err(err) = axum::serve(listener, app).await {
            warn!("static server stopped: {err}");
        }
    });
}
