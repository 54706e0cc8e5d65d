// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-slot watch state.
//
// A slot absent from the table is Idle. `try_begin` is the only way in and
// `finish` / `release` the only ways out, so at most one rename is in flight
// per slot.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where an in-flight slot is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPhase {
    /// Non-empty payload seen, entered the table.
    Detected,
    /// Waiting for the writer to go quiet.
    DebounceWait,
    /// Attempting the rename, possibly backing off from a lock.
    LockRetry,
}

/// How an in-flight cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// The payload was renamed to its output file.
    Completed,
    /// Still locked after the retry limit; the payload stays in place.
    Abandoned,
    /// A non-lock error ended the cycle.
    Failed,
}

/// State of one in-flight slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotState {
    pub slot_id: String,
    pub phase: SlotPhase,
    pub lock_retry_count: u32,
    pub since: DateTime<Utc>,
}

/// Point-in-time view of the bridge for status output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeSnapshot {
    pub running: bool,
    pub in_flight: Vec<SlotState>,
    pub completed: u64,
    pub abandoned: u64,
    pub failed: u64,
    pub lock_retries: u64,
}

#[derive(Debug, Default)]
struct TableInner {
    active: HashMap<String, SlotState>,
    completed: u64,
    abandoned: u64,
    failed: u64,
    lock_retries: u64,
}

#[derive(Debug, Default)]
pub struct SlotTable {
    inner: Mutex<TableInner>,
}

impl SlotTable {
    fn lock(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter `Detected` for `slot_id`. False if the slot is already in flight.
    pub fn try_begin(&self, slot_id: &str) -> bool {
        let mut inner = self.lock();
        if inner.active.contains_key(slot_id) {
            return false;
        }
        inner.active.insert(
            slot_id.to_owned(),
            SlotState {
                slot_id: slot_id.to_owned(),
                phase: SlotPhase::Detected,
                lock_retry_count: 0,
                since: Utc::now(),
            },
        );
        true
    }

    pub fn advance(&self, slot_id: &str, phase: SlotPhase) {
        if let Some(state) = self.lock().active.get_mut(slot_id) {
            state.phase = phase;
        }
    }

    /// Count one more lock retry and return the slot's total.
    pub fn record_retry(&self, slot_id: &str) -> u32 {
        let mut inner = self.lock();
        inner.lock_retries += 1;
        match inner.active.get_mut(slot_id) {
            Some(state) => {
                state.lock_retry_count += 1;
                state.lock_retry_count
            }
            None => 0,
        }
    }

    /// Leave the table with a counted outcome.
    pub fn finish(&self, slot_id: &str, outcome: SlotOutcome) {
        let mut inner = self.lock();
        if inner.active.remove(slot_id).is_none() {
            return;
        }
        match outcome {
            SlotOutcome::Completed => inner.completed += 1,
            SlotOutcome::Abandoned => inner.abandoned += 1,
            SlotOutcome::Failed => inner.failed += 1,
        }
    }

    /// Leave the table without counting anything (nothing to deliver, or
    /// the cycle was cancelled).
    pub fn release(&self, slot_id: &str) {
        self.lock().active.remove(slot_id);
    }

    pub fn is_in_flight(&self, slot_id: &str) -> bool {
        self.lock().active.contains_key(slot_id)
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        let inner = self.lock();
        let mut in_flight: Vec<SlotState> = inner.active.values().cloned().collect();
        in_flight.sort_by(|a, b| a.slot_id.cmp(&b.slot_id));
        BridgeSnapshot {
            running: false,
            in_flight,
            completed: inner.completed,
            abandoned: inner.abandoned,
            failed: inner.failed,
            lock_retries: inner.lock_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_for_same_slot_is_rejected() {
        let table = SlotTable::default();
        assert!(table.try_begin("tray-1"));
        assert!(!table.try_begin("tray-1"));
        assert!(table.try_begin("tray-2"));
    }

    #[test]
    fn finish_returns_slot_to_idle_and_counts() {
        let table = SlotTable::default();
        table.try_begin("tray-1");
        table.advance("tray-1", SlotPhase::LockRetry);
        assert_eq!(table.record_retry("tray-1"), 1);
        assert_eq!(table.record_retry("tray-1"), 2);

        table.finish("tray-1", SlotOutcome::Completed);
        assert!(!table.is_in_flight("tray-1"));
        assert!(table.try_begin("tray-1"));

        let snapshot = table.snapshot();
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.lock_retries, 2);
        assert_eq!(snapshot.in_flight.len(), 1);
        assert_eq!(snapshot.in_flight[0].lock_retry_count, 0);
    }

    #[test]
    fn release_does_not_count() {
        let table = SlotTable::default();
        table.try_begin("tray-3");
        table.release("tray-3");
        let snapshot = table.snapshot();
        assert!(snapshot.in_flight.is_empty());
        assert_eq!(snapshot.completed + snapshot.abandoned + snapshot.failed, 0);
    }

    #[test]
    fn finish_for_idle_slot_is_ignored() {
        let table = SlotTable::default();
        table.finish("tray-1", SlotOutcome::Abandoned);
        assert_eq!(table.snapshot().abandoned, 0);
    }
}
