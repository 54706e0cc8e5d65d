// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Slot watcher: turns filesystem events into renames.
//
// The OS watcher only forwards changed paths into an mpsc channel. The event
// loop consumes that channel, claims the slot synchronously (before any
// await), and spawns one cycle per claimed slot:
//
//   Detected -> DebounceWait -> LockRetry -> Completed | Abandoned | Failed
//
// Cycles live in a JoinSet so shutdown can cancel their timers. Besides OS
// events the loop takes rescan requests from the adapter, which is how a
// job that arrived without an event (left over from a previous run, or
// abandoned earlier) gets another cycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use trayport_core::config::SlotConfig;
use trayport_core::error::{Result, TrayportError};

use super::BridgeCore;
use super::slots::{SlotOutcome, SlotPhase};
use crate::retry::{RetryDecision, should_retry};

/// Subscribe to changes in `directory`, forwarding changed paths to `tx`.
///
/// The subscription ends when the returned watcher is dropped.
pub(crate) fn subscribe(
    directory: &Path,
    tx: mpsc::UnboundedSender<PathBuf>,
) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                for path in event.paths {
                    // Receiver gone means the loop has stopped.
                    let _ = tx.send(path);
                }
            }
        }
        Err(e) => warn!(error = %e, "filesystem watch error"),
    })
    .map_err(|e| TrayportError::Watch(format!("create watcher: {e}")))?;

    watcher
        .watch(directory, RecursiveMode::NonRecursive)
        .map_err(|e| TrayportError::Watch(format!("watch {}: {e}", directory.display())))?;

    info!(directory = %directory.display(), "watching bridge directory");
    Ok(watcher)
}

/// Consume `events` and `rescans` until the event stream ends or `shutdown`
/// fires.
pub(crate) async fn event_loop(
    core: Arc<BridgeCore>,
    mut events: mpsc::UnboundedReceiver<PathBuf>,
    mut rescans: mpsc::UnboundedReceiver<PathBuf>,
    shutdown: Arc<Notify>,
) {
    let mut cycles = JoinSet::new();
    let mut open = true;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!(active = cycles.len(), "bridge loop received shutdown signal");
                cycles.abort_all();
                break;
            }

            event = events.recv(), if open => match event {
                Some(path) => {
                    if let Some(slot) = detect(&core, &path) {
                        cycles.spawn(run_cycle(Arc::clone(&core), slot));
                    }
                }
                None => {
                    debug!("bridge event stream closed");
                    open = false;
                }
            },

            Some(path) = rescans.recv() => {
                if let Some(slot) = detect(&core, &path) {
                    cycles.spawn(run_cycle(Arc::clone(&core), slot));
                }
            }

            Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    error!(error = %e, "bridge slot cycle panicked");
                }
            }
        }

        if !open && cycles.is_empty() {
            break;
        }
    }

    // Drain aborted cycles so their guards release the slots.
    while cycles.join_next().await.is_some() {}
}

/// Claim the slot behind `path` if it now holds a job.
///
/// Runs synchronously inside the loop, so two events for one slot can never
/// both get past `try_begin`.
fn detect(core: &BridgeCore, path: &Path) -> Option<SlotConfig> {
    let file_name = path.file_name()?.to_str()?;
    let slot = core.slot_for_file(file_name)?;

    match core.fs.size(&core.placeholder_path(slot)) {
        Ok(0) => {
            debug!(slot = %slot.slot_id, "placeholder is empty, ignoring");
            return None;
        }
        Ok(_) => {}
        Err(e) => {
            debug!(slot = %slot.slot_id, error = %e, "slot file not readable, ignoring");
            return None;
        }
    }

    if !core.table.try_begin(&slot.slot_id) {
        debug!(slot = %slot.slot_id, "slot already in flight, ignoring event");
        return None;
    }
    info!(slot = %slot.slot_id, file = %file_name, "job detected in bridge slot");
    Some(slot.clone())
}

/// Releases the slot if a cycle ends without reaching `finish`.
struct SlotGuard {
    core: Arc<BridgeCore>,
    slot_id: String,
    armed: bool,
}

impl SlotGuard {
    fn finish(mut self, outcome: SlotOutcome) {
        self.core.table.finish(&self.slot_id, outcome);
        self.armed = false;
    }

    fn release(mut self) {
        self.core.table.release(&self.slot_id);
        self.armed = false;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            self.core.table.release(&self.slot_id);
        }
    }
}

/// Deliver the job in `slot`, which `detect` has already claimed.
///
/// After a delivery the placeholder is checked once more: a job written
/// while the slot was in flight had its events dropped, so it is picked up
/// here instead.
async fn run_cycle(core: Arc<BridgeCore>, slot: SlotConfig) {
    let source = core.placeholder_path(&slot);
    loop {
        let guard = SlotGuard {
            core: Arc::clone(&core),
            slot_id: slot.slot_id.clone(),
            armed: true,
        };
        let Some(outcome) = deliver(&core, &slot, &source).await else {
            guard.release();
            return;
        };
        guard.finish(outcome);

        if outcome != SlotOutcome::Completed
            || !matches!(core.fs.size(&source), Ok(n) if n > 0)
            || !core.table.try_begin(&slot.slot_id)
        {
            return;
        }
        info!(slot = %slot.slot_id, "another job arrived during delivery");
    }
}

/// One pass through debounce and the rename loop. `None` if the slot was
/// emptied before anything could be delivered.
async fn deliver(core: &BridgeCore, slot: &SlotConfig, source: &Path) -> Option<SlotOutcome> {
    core.table.advance(&slot.slot_id, SlotPhase::DebounceWait);
    tokio::time::sleep(core.debounce).await;

    if !matches!(core.fs.size(source), Ok(n) if n > 0) {
        debug!(slot = %slot.slot_id, "slot emptied during debounce, nothing to deliver");
        return None;
    }

    core.table.advance(&slot.slot_id, SlotPhase::LockRetry);
    let mut retries = 0;
    let outcome = loop {
        let target = core.output_path(slot);
        let err = match core.fs.rename(source, &target) {
            Ok(()) => {
                info!(slot = %slot.slot_id, output = %target.display(), "bridge job delivered");
                break SlotOutcome::Completed;
            }
            Err(e) => e,
        };

        match should_retry(&err, retries, &core.policy) {
            RetryDecision::RetryAfter(delay) => {
                retries = core.table.record_retry(&slot.slot_id);
                warn!(slot = %slot.slot_id, attempt = retries, error = %err, "slot file locked, retrying rename");
                tokio::time::sleep(delay).await;
            }
            RetryDecision::Exhausted => {
                error!(
                    slot = %slot.slot_id,
                    retries,
                    path = %source.display(),
                    "slot file still locked; abandoning and leaving the payload in place"
                );
                break SlotOutcome::Abandoned;
            }
            RetryDecision::GiveUp => {
                error!(slot = %slot.slot_id, error = %err, "rename failed; dropping this event");
                break SlotOutcome::Failed;
            }
        }
    };

    if outcome == SlotOutcome::Completed {
        core.restore_placeholder(slot);
    }
    Some(outcome)
}
