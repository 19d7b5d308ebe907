//! HTTP surface: the caching reverse proxy.

mod proxy;

use std::net::SocketAddr;

use axum::{Router, middleware, routing::any};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::cache::{HttpCache, http_cache_layer};

use super::error::InfraError;

pub use proxy::{Upstream, forward};

/// Router forwarding every path and method to `upstream`, behind the cache.
pub fn build_router(cache: HttpCache, upstream: Upstream) -> Router {
    Router::new()
        .route("/", any(forward))
        .route("/{*path}", any(forward))
        .with_state(upstream)
        .layer(middleware::from_fn_with_state(cache, http_cache_layer))
}

/// Serve `router` on `addr` until Ctrl-C.
///
/// Peer addresses are exposed as `ConnectInfo<SocketAddr>` for the purge
/// allow-list.
pub async fn serve(addr: SocketAddr, router: Router) -> Result<(), InfraError> {
    let listener = TcpListener::bind(addr).await?;
    info!(
        target = "strata::infra::http",
        addr = %listener.local_addr()?,
        "listening"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!(target = "strata::infra::http", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target = "strata::infra::http",
            error = %err,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    info!(target = "strata::infra::http", "shutdown signal received");
}
