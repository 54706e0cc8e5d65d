// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ingress endpoints: POST /print, GET /status, GET /health.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use trayport_core::error::TrayportError;
use trayport_core::types::TargetDescriptor;
use trayport_print::BridgeSnapshot;

use super::errors::ApiError;
use crate::services::app_services::AppServices;

/// Standard alphabet, padding optional.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PrintRequest {
    #[serde(default)]
    pub(crate) doc_type: Option<String>,
    #[serde(default)]
    pub(crate) printer_name: Option<String>,
    #[serde(default)]
    pub(crate) base64: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PrintResponse {
    pub(crate) success: bool,
    /// Job id assigned by the backend, when it returns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) job_id: Option<String>,
    /// Trayport's own id for this request, as it appears in the logs.
    pub(crate) id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusResponse {
    pub(crate) status: &'static str,
    pub(crate) printer: String,
    pub(crate) printer_url: String,
    pub(crate) mappings: usize,
    pub(crate) bridge: BridgeSnapshot,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
}

/// Treat `""` the same as an absent field.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Decode a base64 payload, tolerating whitespace and a `data:` URL prefix.
fn decode_payload(encoded: &str) -> Result<Vec<u8>, TrayportError> {
    let body = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    PAYLOAD_ENGINE
        .decode(compact.as_bytes())
        .map_err(|e| TrayportError::InvalidPayload(format!("base64: {e}")))
}

pub(crate) async fn print(
    State(services): State<AppServices>,
    body: Result<Json<PrintRequest>, JsonRejection>,
) -> Result<Json<PrintResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "unreadable print request");
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError {
                status: rejection.status(),
                message: rejection.body_text(),
            }
        } else {
            ApiError::missing_data()
        }
    })?;

    let encoded = present(request.base64).ok_or_else(ApiError::missing_data)?;
    let doc_type = present(request.doc_type);
    let printer_name = present(request.printer_name);
    if doc_type.is_none() && printer_name.is_none() {
        return Err(ApiError::missing_data());
    }

    let payload = decode_payload(&encoded)?;
    let router = services.router();
    let outcome = match (doc_type, printer_name) {
        (Some(doc_type), _) => {
            info!(%doc_type, payload_bytes = payload.len(), "print request");
            router.dispatch(&doc_type, payload).await?
        }
        (None, Some(printer_name)) => {
            info!(printer = %printer_name, payload_bytes = payload.len(), "direct spooler request");
            router
                .dispatch_to(
                    &printer_name,
                    TargetDescriptor::SpoolerPrinter { printer_name: printer_name.clone() },
                    payload,
                )
                .await?
        }
        (None, None) => return Err(ApiError::missing_data()),
    };

    Ok(Json(PrintResponse {
        success: true,
        job_id: outcome.backend_job_id,
        id: outcome.job_id.to_string(),
    }))
}

pub(crate) async fn status(State(services): State<AppServices>) -> Json<StatusResponse> {
    let config = services.config();
    Json(StatusResponse {
        status: "online",
        printer_url: config.printer_url(),
        printer: config.printer_ip,
        mappings: services.router().routes().resolver.len(),
        bridge: services.router().bridge().snapshot(),
    })
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
