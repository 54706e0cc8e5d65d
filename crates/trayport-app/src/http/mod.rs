// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP ingress: axum router, middleware and server loop.

mod admin;
mod errors;
mod handlers;

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::services::app_services::AppServices;

/// JSON bodies carry whole documents as base64.
pub(crate) const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

pub(crate) fn router(services: AppServices) -> Router {
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/print", post(handlers::print))
        .route("/status", get(handlers::status))
        .route("/health", get(handlers::health))
        .route("/config", get(admin::get_config).put(admin::put_config))
        .route("/trays", get(admin::trays))
        .route("/printers", get(admin::printers))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub(crate) async fn serve<F>(services: AppServices, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP ingress listening");

    axum::serve(listener, router(services).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_registers() {
        let dir = tempfile::tempdir().unwrap();
        let (services, _) = handlers::tests::services(dir.path());
        let _router = router(services);
    }

    #[test]
    fn body_limit_fits_large_documents() {
        assert_eq!(MAX_BODY_BYTES, 52_428_800);
    }
}
