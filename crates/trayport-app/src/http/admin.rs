// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Administrative endpoints used by the setup UI.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::HOST},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use trayport_core::error::TrayportError;
use trayport_core::types::Mapping;

use super::errors::ApiError;
use crate::services::app_services::AppServices;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfigView {
    pub(crate) mappings: Vec<Mapping>,
    pub(crate) printer_ip: String,
    pub(crate) api_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfigUpdate {
    #[serde(default)]
    pub(crate) printer_ip: Option<String>,
    #[serde(default)]
    pub(crate) mappings: Option<Vec<Mapping>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SaveResponse {
    pub(crate) success: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct TraysResponse {
    pub(crate) success: bool,
    pub(crate) trays: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PrintersResponse {
    pub(crate) success: bool,
    pub(crate) printers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ScanFailure {
    pub(crate) success: bool,
    pub(crate) error: String,
}

fn scan_failure(err: &TrayportError) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(ScanFailure {
            success: false,
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// `http://<host the caller used>/print`, falling back to localhost.
fn api_url(headers: &HeaderMap, port: u16) -> String {
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|host| !host.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("localhost:{port}"));
    format!("http://{host}/print")
}

pub(crate) async fn get_config(
    State(services): State<AppServices>,
    headers: HeaderMap,
) -> Json<ConfigView> {
    let config = services.config();
    Json(ConfigView {
        api_url: api_url(&headers, config.port),
        mappings: config.mappings,
        printer_ip: config.printer_ip,
    })
}

pub(crate) async fn put_config(
    State(services): State<AppServices>,
    body: Result<Json<ConfigUpdate>, JsonRejection>,
) -> Result<Json<SaveResponse>, ApiError> {
    let Json(update) = body.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "rejected config update");
        ApiError::bad_request(rejection.body_text())
    })?;

    services
        .save_config(update.printer_ip, update.mappings)
        .map_err(|err| match err {
            TrayportError::Config(message) => ApiError::bad_request(message),
            other => other.into(),
        })?;
    Ok(Json(SaveResponse { success: true }))
}

pub(crate) async fn trays(State(services): State<AppServices>) -> Response {
    let routes = services.router().routes();
    let network = &routes.network;
    match network.list_media_sources().await {
        Ok(trays) => Json(TraysResponse {
            success: true,
            trays,
        })
        .into_response(),
        Err(err) => {
            warn!(uri = %network.uri(), error = %err, "tray scan failed");
            scan_failure(&err)
        }
    }
}

pub(crate) async fn printers(State(services): State<AppServices>) -> Response {
    match services.router().spooler().list_printers().await {
        Ok(printers) => Json(PrintersResponse {
            success: true,
            printers,
        })
        .into_response(),
        Err(err) => {
            warn!(error = %err, "printer listing failed");
            scan_failure(&err)
        }
    }
}
