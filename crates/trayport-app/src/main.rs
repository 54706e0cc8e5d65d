// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Trayport, a document-type print router.
//
// Entry point. Initialises logging and services, starts the filesystem bridge
// when enabled, and serves the HTTP ingress until SIGINT/SIGTERM.

mod http;
mod services;

use std::process::ExitCode;

use services::app_services::AppServices;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Trayport starting");

    let services = match AppServices::init() {
        Ok(services) => services,
        Err(e) => {
            tracing::error!(error = %e, "could not initialise services");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(data_dir = %services.data_dir().display(), "services ready");

    if let Err(e) = services.start_bridge() {
        tracing::error!(error = %e, "filesystem bridge failed to start");
        return ExitCode::FAILURE;
    }

    let port = services.config().port;
    let served = http::serve(services.clone(), port, shutdown_signal()).await;

    services.shutdown().await;

    match served {
        Ok(()) => {
            tracing::info!("Trayport stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(port, error = %e, "HTTP ingress failed");
            ExitCode::FAILURE
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
