// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded retry policy for renames that lose a race against a file lock.
//
// Only lock contention is retried. Any other I/O failure is terminal for the
// event that triggered it.

use std::io;
use std::time::Duration;

use tracing::{debug, warn};

use trayport_core::config::BridgeConfig;

/// Retry configuration for the bridge's rename loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetryPolicy {
    /// Rename attempts allowed after the first one fails.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl LockRetryPolicy {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            max_retries: config.max_lock_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Result of evaluating a failed rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The file is locked; try again after this delay.
    RetryAfter(Duration),
    /// Not a lock: do not retry.
    GiveUp,
    /// Still locked after the allowed number of retries.
    Exhausted,
}

/// Does `err` mean another process currently holds the file?
///
/// On Windows a held file surfaces as a sharing or lock violation, which std
/// reports as `PermissionDenied`. On Unix that kind means a real permission
/// problem and is not retried.
pub fn is_lock_contention(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::ResourceBusy | io::ErrorKind::WouldBlock => return true,
        io::ErrorKind::PermissionDenied if cfg!(windows) => return true,
        _ => {}
    }
    match err.raw_os_error() {
        // EBUSY
        #[cfg(unix)]
        Some(16) => true,
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        #[cfg(windows)]
        Some(32 | 33) => true,
        _ => false,
    }
}

/// Decide what to do after rename attempt number `retries_so_far + 1` failed.
pub fn should_retry(err: &io::Error, retries_so_far: u32, policy: &LockRetryPolicy) -> RetryDecision {
    if !is_lock_contention(err) {
        debug!(error = %err, "rename failed for a reason other than a lock");
        return RetryDecision::GiveUp;
    }
    if retries_so_far >= policy.max_retries {
        warn!(retries = retries_so_far, max = policy.max_retries, "lock retry limit exhausted");
        return RetryDecision::Exhausted;
    }
    debug!(
        attempt = retries_so_far + 1,
        delay_ms = policy.backoff.as_millis() as u64,
        "file locked, scheduling rename retry"
    );
    RetryDecision::RetryAfter(policy.backoff)
}
