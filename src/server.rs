use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use log::{info, warn};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;

use crate::config::ServerConfig;

// ------------------------------------------------------------
// Scrape surface
// ------------------------------------------------------------
//
// Read-only view of the registry. Gathering goes through the
// registry's own locking, so scrapes never block a fetcher for
// longer than one gauge update.
//

/// Renders every registered family in the Prometheus text format.
pub fn render(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub fn router(registry: Arc<Registry>, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(registry)
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> Response {
    match render(&registry) {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", TextEncoder::new().format_type().to_string())],
            text,
        )
            .into_response(),
        Err(e) => {
            warn!("failed to encode metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

async fn health_handler() -> Response {
    (StatusCode::OK, "OK").into_response()
}

/// Binds `cfg.listen` and serves until `shutdown` resolves.
pub async fn serve<F>(
    registry: Arc<Registry>,
    cfg: &ServerConfig,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(cfg.listen).await?;
    serve_on(listener, router(registry, &cfg.path), shutdown).await
}

async fn serve_on<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("serving metrics on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
