// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Trayport print router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::TrayportError;

/// Tray value that lets the network printer choose its own input tray.
pub const AUTO_TRAY: &str = "auto";

/// MIME type of every payload routed through Trayport.
pub const PAYLOAD_MIME_TYPE: &str = "application/pdf";

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved physical destination for a job.
///
/// Decided once when the mapping is loaded, so dispatch is a single
/// exhaustive match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetDescriptor {
    /// An input tray on the network printer, or [`AUTO_TRAY`].
    NetworkTray { tray_id: String },
    /// A named printer known to the OS print spooler.
    SpoolerPrinter { printer_name: String },
    /// A placeholder slot watched by the filesystem bridge.
    BridgeSlot { slot_id: String },
}

impl TargetDescriptor {
    /// Short backend label for logs and status output.
    pub fn backend(&self) -> &'static str {
        match self {
            Self::NetworkTray { .. } => "network",
            Self::SpoolerPrinter { .. } => "spooler",
            Self::BridgeSlot { .. } => "bridge",
        }
    }
}

impl std::fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NetworkTray { tray_id } => write!(f, "network tray '{tray_id}'"),
            Self::SpoolerPrinter { printer_name } => write!(f, "spooler printer '{printer_name}'"),
            Self::BridgeSlot { slot_id } => write!(f, "bridge slot '{slot_id}'"),
        }
    }
}

/// A logical document type bound to a physical target.
///
/// Persisted in the legacy shape `{name, tray}`, `{name, printer}` or
/// `{name, slot}`; exactly one target key must be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MappingRecord", into = "MappingRecord")]
pub struct Mapping {
    pub name: String,
    pub target: TargetDescriptor,
}

impl Mapping {
    pub fn new(name: impl Into<String>, target: TargetDescriptor) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }
}

/// On-disk representation of a [`Mapping`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tray: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
}

impl TryFrom<MappingRecord> for Mapping {
    type Error = TrayportError;

    fn try_from(record: MappingRecord) -> Result<Self, Self::Error> {
        if record.name.is_empty() {
            return Err(TrayportError::Config("mapping with empty name".into()));
        }
        let target = match (record.tray, record.printer, record.slot) {
            (Some(tray_id), None, None) => TargetDescriptor::NetworkTray { tray_id },
            (None, Some(printer_name), None) => TargetDescriptor::SpoolerPrinter { printer_name },
            (None, None, Some(slot_id)) => TargetDescriptor::BridgeSlot { slot_id },
            (None, None, None) => {
                return Err(TrayportError::Config(format!(
                    "mapping '{}' has no tray, printer or slot",
                    record.name
                )));
            }
            _ => {
                return Err(TrayportError::Config(format!(
                    "mapping '{}' names more than one target",
                    record.name
                )));
            }
        };
        Ok(Self {
            name: record.name,
            target,
        })
    }
}

impl From<Mapping> for MappingRecord {
    fn from(mapping: Mapping) -> Self {
        let mut record = MappingRecord {
            name: mapping.name,
            ..Default::default()
        };
        match mapping.target {
            TargetDescriptor::NetworkTray { tray_id } => record.tray = Some(tray_id),
            TargetDescriptor::SpoolerPrinter { printer_name } => record.printer = Some(printer_name),
            TargetDescriptor::BridgeSlot { slot_id } => record.slot = Some(slot_id),
        }
        record
    }
}

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created, target resolved, not yet handed to a backend.
    Pending,
    /// Handed to a backend, awaiting its answer.
    Submitted,
    /// Backend accepted the job.
    Succeeded,
    /// Backend refused the job or could not be reached.
    Failed,
}

/// A single logical print request, alive for one dispatch.
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub id: JobId,
    pub doc_type: String,
    pub payload: Vec<u8>,
    pub target: TargetDescriptor,
    pub status: JobStatus,
    pub backend_job_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PrintJob {
    pub fn new(doc_type: impl Into<String>, payload: Vec<u8>, target: TargetDescriptor) -> Self {
        Self {
            id: JobId::new(),
            doc_type: doc_type.into(),
            payload,
            target,
            status: JobStatus::Pending,
            backend_job_id: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// SHA-256 of the payload, for correlating log lines.
    pub fn payload_digest(&self) -> String {
        payload_digest(&self.payload)
    }
}

/// Uniform result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub job_id: JobId,
    /// Identifier assigned by the backend, when it hands one back.
    pub backend_job_id: Option<String>,
}

/// Compute the SHA-256 of `data` as lowercase hex.
pub fn payload_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tray_record_becomes_network_target() {
        let mapping: Mapping =
            serde_json::from_str(r#"{"name":"invoice","tray":"tray-1"}"#).unwrap();
        assert_eq!(mapping.name, "invoice");
        assert_eq!(
            mapping.target,
            TargetDescriptor::NetworkTray {
                tray_id: "tray-1".into()
            }
        );
    }

    #[test]
    fn printer_and_slot_records_pick_their_variants() {
        let printer: Mapping =
            serde_json::from_str(r#"{"name":"label","printer":"Zebra"}"#).unwrap();
        assert_eq!(printer.target.backend(), "spooler");

        let slot: Mapping = serde_json::from_str(r#"{"name":"legacy","slot":"tray-3"}"#).unwrap();
        assert_eq!(
            slot.target,
            TargetDescriptor::BridgeSlot {
                slot_id: "tray-3".into()
            }
        );
    }

    #[test]
    fn record_with_two_targets_is_rejected() {
        let result: std::result::Result<Mapping, _> =
            serde_json::from_str(r#"{"name":"x","tray":"auto","printer":"P"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn record_without_target_is_rejected() {
        let result: std::result::Result<Mapping, _> = serde_json::from_str(r#"{"name":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn mapping_serializes_back_to_legacy_shape() {
        let mapping = Mapping::new(
            "invoice",
            TargetDescriptor::NetworkTray {
                tray_id: AUTO_TRAY.into(),
            },
        );
        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json, serde_json::json!({"name": "invoice", "tray": "auto"}));
    }

    #[test]
    fn new_job_starts_pending() {
        let job = PrintJob::new(
            "invoice",
            b"%PDF".to_vec(),
            TargetDescriptor::SpoolerPrinter {
                printer_name: "P".into(),
            },
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.backend_job_id.is_none());
    }

    #[test]
    fn digest_of_known_value() {
        // SHA-256("hello"), as printed by sha256sum.
        let expected = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert_eq!(payload_digest(b"hello"), expected);
    }
}
