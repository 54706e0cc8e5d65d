// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Trayport.

use thiserror::Error;

/// Top-level error type for all Trayport operations.
#[derive(Debug, Error)]
pub enum TrayportError {
    // -- Client errors --
    #[error("Missing Data")]
    MissingData,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("No mapping for {0}")]
    MappingNotFound(String),

    // -- Network printer --
    #[error("printer unreachable: {0}")]
    Unreachable(String),

    #[error("printer rejected job: {token}")]
    RejectedByPrinter { token: String },

    // -- OS spooler --
    #[error("staging failed: {0}")]
    StagingFailed(String),

    #[error("spooler rejected job: {0}")]
    SpoolerRejected(String),

    // -- Filesystem bridge --
    #[error("unknown bridge slot: {0}")]
    UnknownSlot(String),

    #[error("bridge slot {0} is busy with another job")]
    SlotBusy(String),

    #[error("filesystem watch failed: {0}")]
    Watch(String),

    // -- Configuration / persistence --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used by the ingress to choose a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing or malformed request. Never retried.
    Client,
    /// No mapping for the requested document type.
    NotFound,
    /// A backend was unreachable or refused the job. The caller may resubmit.
    Backend,
    /// Local failure unrelated to the request (config, disk, watcher).
    Internal,
}

impl TrayportError {
    /// Classify this error for the caller.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingData | Self::InvalidPayload(_) => ErrorClass::Client,
            Self::MappingNotFound(_) => ErrorClass::NotFound,
            Self::Unreachable(_)
            | Self::RejectedByPrinter { .. }
            | Self::StagingFailed(_)
            | Self::SpoolerRejected(_)
            | Self::UnknownSlot(_)
            | Self::SlotBusy(_) => ErrorClass::Backend,
            Self::Watch(_) | Self::Config(_) | Self::Io(_) | Self::Serialization(_) => {
                ErrorClass::Internal
            }
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TrayportError>;
