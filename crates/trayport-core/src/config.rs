// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrayportError};
use crate::mapping::MappingResolver;
use crate::types::{Mapping, TargetDescriptor};

/// Shortest quiescence delay before a bridge slot is touched.
pub const MIN_DEBOUNCE_MS: u64 = 500;
/// Shortest back-off between rename attempts on a locked slot file.
pub const MIN_RETRY_BACKOFF_MS: u64 = 1000;
/// Shortest time a staged spooler file is kept for the spooler to read.
pub const MIN_CLEANUP_GRACE_MS: u64 = 2000;

/// Persistent application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Port the HTTP ingress listens on.
    pub port: u16,
    /// Address of the network (IPP) printer.
    pub printer_ip: String,
    /// IPP port on the network printer.
    pub printer_port: u16,
    /// `requesting-user-name` sent with every network job.
    pub requesting_user_name: String,
    /// `job-name` sent with every network job.
    pub job_name: String,
    /// How long the ingress waits for the network printer before giving up.
    pub submit_timeout_secs: u64,
    /// Document type -> target bindings.
    pub mappings: Vec<Mapping>,
    pub spooler: SpoolerConfig,
    pub bridge: BridgeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            printer_ip: "192.168.1.50".into(),
            printer_port: 631,
            requesting_user_name: "CRS-Service".into(),
            job_name: "API-Print".into(),
            submit_timeout_secs: 60,
            mappings: Vec::new(),
            spooler: SpoolerConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl AppConfig {
    /// URL of the network printer's IPP endpoint.
    pub fn printer_url(&self) -> String {
        format!("http://{}:{}/ipp/print", self.printer_ip, self.printer_port)
    }

    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        MappingResolver::new(&self.mappings)?;

        at_least("bridge.debounce_ms", self.bridge.debounce_ms, MIN_DEBOUNCE_MS)?;
        at_least(
            "bridge.retry_backoff_ms",
            self.bridge.retry_backoff_ms,
            MIN_RETRY_BACKOFF_MS,
        )?;
        at_least(
            "spooler.cleanup_grace_ms",
            self.spooler.cleanup_grace_ms,
            MIN_CLEANUP_GRACE_MS,
        )?;

        let mut slot_ids = HashSet::new();
        let mut file_names = HashSet::new();
        for slot in &self.bridge.slots {
            if !slot_ids.insert(slot.slot_id.as_str()) {
                return Err(TrayportError::Config(format!(
                    "duplicate bridge slot id '{}'",
                    slot.slot_id
                )));
            }
            if !file_names.insert(slot.file_name.as_str()) {
                return Err(TrayportError::Config(format!(
                    "bridge slot file '{}' is used twice",
                    slot.file_name
                )));
            }
            if slot.file_name.contains(['/', '\\']) {
                return Err(TrayportError::Config(format!(
                    "bridge slot file '{}' must be a bare file name",
                    slot.file_name
                )));
            }
        }

        for mapping in &self.mappings {
            if let TargetDescriptor::BridgeSlot { slot_id } = &mapping.target
                && !slot_ids.contains(slot_id.as_str())
            {
                return Err(TrayportError::Config(format!(
                    "mapping '{}' points at unknown bridge slot '{slot_id}'",
                    mapping.name
                )));
            }
        }
        Ok(())
    }
}

fn at_least(field: &str, value: u64, minimum: u64) -> Result<()> {
    if value < minimum {
        return Err(TrayportError::Config(format!(
            "{field} is {value}, must be at least {minimum}"
        )));
    }
    Ok(())
}

/// OS print spooler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolerConfig {
    /// Program invoked as `<program> -d <printer> <file>`.
    pub program: String,
    /// Program whose output lists installed printers, one per line.
    pub list_program: String,
    /// Arguments passed to `list_program`.
    pub list_args: Vec<String>,
    /// Where temporary payload files are written. Defaults to the OS temp dir.
    pub staging_dir: Option<PathBuf>,
    /// Delay before a staged file is deleted.
    pub cleanup_grace_ms: u64,
}

impl Default for SpoolerConfig {
    fn default() -> Self {
        Self {
            program: "lp".into(),
            list_program: "lpstat".into(),
            list_args: vec!["-e".into()],
            staging_dir: None,
            cleanup_grace_ms: MIN_CLEANUP_GRACE_MS,
        }
    }
}

/// Legacy filesystem-bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Start the slot watcher with the service.
    pub enabled: bool,
    /// Directory holding the placeholder files.
    pub directory: PathBuf,
    /// Where renamed jobs are written. Defaults to `directory`.
    pub output_directory: Option<PathBuf>,
    /// Quiescence delay before the first rename attempt.
    pub debounce_ms: u64,
    /// Delay between rename attempts while the file is locked.
    pub retry_backoff_ms: u64,
    /// Rename attempts after the first before the slot is abandoned.
    pub max_lock_retries: u32,
    pub slots: Vec<SlotConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("storage"),
            output_directory: None,
            debounce_ms: MIN_DEBOUNCE_MS,
            retry_backoff_ms: MIN_RETRY_BACKOFF_MS,
            max_lock_retries: 10,
            slots: vec![
                SlotConfig::new("tray-1", "output_tray__1.pdf", "TRAY_1_STD"),
                SlotConfig::new("tray-2", "output_tray__2.pdf", "TRAY_2_ENV"),
                SlotConfig::new("tray-3", "output_tray__3.pdf", "TRAY_3_LEG"),
            ],
        }
    }
}

impl BridgeConfig {
    pub fn output_directory(&self) -> PathBuf {
        self.output_directory
            .clone()
            .unwrap_or_else(|| self.directory.clone())
    }
}

/// One watched placeholder file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub slot_id: String,
    /// Placeholder file name inside the bridge directory.
    pub file_name: String,
    /// Prefix of delivered job files (`<prefix>_<HH-MM-SS>.pdf`).
    pub prefix: String,
}

impl SlotConfig {
    pub fn new(
        slot_id: impl Into<String>,
        file_name: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            slot_id: slot_id.into(),
            file_name: file_name.into(),
            prefix: prefix.into(),
        }
    }
}
