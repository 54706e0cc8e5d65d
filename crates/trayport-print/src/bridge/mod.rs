// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filesystem-bridge adapter.
//
// A legacy downstream process only understands "a file appeared in a
// well-known slot". Each slot is a placeholder file in one directory; a job
// is a non-empty placeholder. The watcher renames it to
// `<prefix>_<HH-MM-SS>.pdf`, which is what the downstream picks up, and puts
// a fresh empty placeholder back.

pub mod fs;
pub mod slots;
mod watcher;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Local;
use notify::RecommendedWatcher;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use trayport_core::config::{BridgeConfig, SlotConfig};
use trayport_core::error::{Result, TrayportError};

pub use fs::{LocalFs, SlotFs};
pub use slots::{BridgeSnapshot, SlotOutcome, SlotPhase, SlotState};

use crate::retry::LockRetryPolicy;
use slots::SlotTable;

/// State shared between the adapter and its watcher loop.
pub(crate) struct BridgeCore {
    slots: Vec<SlotConfig>,
    directory: PathBuf,
    output_directory: PathBuf,
    debounce: Duration,
    policy: LockRetryPolicy,
    fs: Arc<dyn SlotFs>,
    table: SlotTable,
    /// Placeholders this process created, removed again on shutdown.
    created: Mutex<HashSet<PathBuf>>,
    /// Serialises producer writes into slots.
    write_guard: Mutex<()>,
}

impl BridgeCore {
    fn slot_for_file(&self, file_name: &str) -> Option<&SlotConfig> {
        self.slots.iter().find(|s| s.file_name == file_name)
    }

    fn slot_by_id(&self, slot_id: &str) -> Option<&SlotConfig> {
        self.slots.iter().find(|s| s.slot_id == slot_id)
    }

    fn placeholder_path(&self, slot: &SlotConfig) -> PathBuf {
        self.directory.join(&slot.file_name)
    }

    /// Unused output path for `slot`, stamped with local wall-clock time.
    fn output_path(&self, slot: &SlotConfig) -> PathBuf {
        let stamp = Local::now().format("%H-%M-%S").to_string();
        output_path_for(&*self.fs, &self.output_directory, &slot.prefix, &stamp)
    }

    fn created(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.created.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_placeholder(&self, slot: &SlotConfig) -> Result<()> {
        let path = self.placeholder_path(slot);
        if self.fs.create_placeholder(&path)? {
            debug!(slot = %slot.slot_id, path = %path.display(), "placeholder created");
            self.created().insert(path);
        }
        Ok(())
    }

    /// Put an empty placeholder back after a delivery.
    fn restore_placeholder(&self, slot: &SlotConfig) {
        if let Err(e) = self.ensure_placeholder(slot) {
            warn!(slot = %slot.slot_id, error = %e, "could not restore placeholder");
        }
    }

    /// Make sure the directories and every placeholder exist.
    fn prepare(&self) -> Result<()> {
        self.fs.create_dir_all(&self.directory)?;
        self.fs.create_dir_all(&self.output_directory)?;
        for slot in &self.slots {
            self.ensure_placeholder(slot)?;
        }
        Ok(())
    }

    /// Remove the placeholders this process created, if they are still empty.
    ///
    /// A non-empty placeholder is an undelivered job and is left alone.
    fn remove_placeholders(&self) {
        let paths: Vec<PathBuf> = self.created().drain().collect();
        for path in paths {
            match self.fs.size(&path) {
                Ok(0) => match self.fs.remove(&path) {
                    Ok(()) => debug!(path = %path.display(), "placeholder removed"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "could not remove placeholder"),
                },
                Ok(bytes) => {
                    warn!(path = %path.display(), bytes, "placeholder holds an undelivered job; keeping it");
                }
                Err(_) => {}
            }
        }
    }
}

/// `<prefix>_<stamp>.pdf`, or `<prefix>_<stamp>_<n>.pdf` if that is taken.
fn output_path_for(fs: &dyn SlotFs, dir: &Path, prefix: &str, stamp: &str) -> PathBuf {
    let first = dir.join(format!("{prefix}_{stamp}.pdf"));
    if !fs.exists(&first) {
        return first;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{prefix}_{stamp}_{n}.pdf"));
        if !fs.exists(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[derive(Default)]
struct Runtime {
    shutdown: Option<Arc<Notify>>,
    task: Option<JoinHandle<()>>,
    watcher: Option<RecommendedWatcher>,
    /// Asks the loop to look at a slot again without a filesystem event.
    rescan: Option<mpsc::UnboundedSender<PathBuf>>,
}

/// Adapter for the legacy filesystem-bridge printer.
pub struct BridgeAdapter {
    core: Arc<BridgeCore>,
    runtime: Mutex<Runtime>,
}

impl BridgeAdapter {
    pub fn new(config: &BridgeConfig) -> Self {
        Self::with_fs(config, Arc::new(LocalFs))
    }

    pub fn with_fs(config: &BridgeConfig, fs: Arc<dyn SlotFs>) -> Self {
        Self {
            core: Arc::new(BridgeCore {
                slots: config.slots.clone(),
                directory: config.directory.clone(),
                output_directory: config.output_directory(),
                debounce: Duration::from_millis(config.debounce_ms),
                policy: LockRetryPolicy::from_config(config),
                fs,
                table: SlotTable::default(),
                created: Mutex::new(HashSet::new()),
                write_guard: Mutex::new(()),
            }),
            runtime: Mutex::new(Runtime::default()),
        }
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.runtime().task.is_some()
    }

    /// Create the placeholders and start watching the slot directory.
    pub fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.core.prepare()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = watcher::subscribe(&self.core.directory, tx)?;
        self.spawn_loop(rx, Some(watcher));
        info!(slots = self.core.slots.len(), "filesystem bridge started");
        Ok(())
    }

    /// Like [`start`](Self::start), but driven by a caller-supplied event
    /// stream instead of the OS watcher.
    pub fn run_with_events(&self, events: mpsc::UnboundedReceiver<PathBuf>) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.core.prepare()?;
        self.spawn_loop(events, None);
        Ok(())
    }

    fn spawn_loop(
        &self,
        events: mpsc::UnboundedReceiver<PathBuf>,
        watcher: Option<RecommendedWatcher>,
    ) {
        let (rescan, rescans) = mpsc::unbounded_channel();
        // Jobs left in a slot before startup produce no event of their own.
        for slot in &self.core.slots {
            let _ = rescan.send(self.core.placeholder_path(slot));
        }

        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(watcher::event_loop(
            Arc::clone(&self.core),
            events,
            rescans,
            Arc::clone(&shutdown),
        ));
        let mut runtime = self.runtime();
        runtime.shutdown = Some(shutdown);
        runtime.task = Some(task);
        runtime.watcher = watcher;
        runtime.rescan = Some(rescan);
    }

    /// Stop watching, cancel pending timers and remove empty placeholders.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let (shutdown, task, watcher) = {
            let mut runtime = self.runtime();
            runtime.rescan = None;
            (
                runtime.shutdown.take(),
                runtime.task.take(),
                runtime.watcher.take(),
            )
        };
        drop(watcher);
        if let Some(signal) = shutdown {
            signal.notify_one();
        }
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "bridge loop ended abnormally");
        }
        self.core.remove_placeholders();
        info!("filesystem bridge stopped");
    }

    /// Write `payload` into `slot_id`'s placeholder for the watcher to pick up.
    ///
    /// Refuses to overwrite a slot that is in flight or still holds an
    /// undelivered job. An undelivered job in an idle slot (left behind by an
    /// abandoned cycle) is handed back to the watcher for another attempt.
    #[instrument(skip(self, payload), fields(slot = %slot_id, bytes = payload.len()))]
    pub fn submit(&self, slot_id: &str, payload: &[u8]) -> Result<()> {
        let slot = self
            .core
            .slot_by_id(slot_id)
            .ok_or_else(|| TrayportError::UnknownSlot(slot_id.to_owned()))?;
        if payload.is_empty() {
            return Err(TrayportError::InvalidPayload(
                "an empty file cannot be delivered through a bridge slot".into(),
            ));
        }
        if !self.is_running() {
            return Err(TrayportError::Watch("filesystem bridge is not running".into()));
        }

        let _writing = self
            .core
            .write_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let path = self.core.placeholder_path(slot);
        let pending = matches!(self.core.fs.size(&path), Ok(n) if n > 0);
        let in_flight = self.core.table.is_in_flight(slot_id);
        if pending && !in_flight {
            info!("slot holds an undelivered job, rescanning it");
            self.rescan(path.clone());
        }
        if pending || in_flight {
            return Err(TrayportError::SlotBusy(slot_id.to_owned()));
        }

        self.core
            .fs
            .write(&path, payload)
            .map_err(|e| TrayportError::StagingFailed(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "payload written to bridge slot");
        Ok(())
    }

    fn rescan(&self, path: PathBuf) {
        if let Some(tx) = &self.runtime().rescan {
            let _ = tx.send(path);
        }
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot {
            running: self.is_running(),
            ..self.core.table.snapshot()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> BridgeConfig {
        BridgeConfig {
            enabled: true,
            directory: dir.join("storage"),
            debounce_ms: 5_000,
            ..Default::default()
        }
    }

    fn running(dir: &Path) -> (BridgeAdapter, mpsc::UnboundedSender<PathBuf>) {
        let bridge = BridgeAdapter::new(&config(dir));
        let (tx, rx) = mpsc::unbounded_channel();
        bridge.run_with_events(rx).unwrap();
        (bridge, tx)
    }

    #[tokio::test]
    async fn startup_creates_missing_placeholders_only() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("storage");
        std::fs::create_dir_all(&storage).unwrap();
        std::fs::write(storage.join("output_tray__2.pdf"), b"%PDF waiting").unwrap();

        let (bridge, _tx) = running(dir.path());

        for name in ["output_tray__1.pdf", "output_tray__3.pdf"] {
            assert_eq!(std::fs::metadata(storage.join(name)).unwrap().len(), 0);
        }
        assert_eq!(
            std::fs::read(storage.join("output_tray__2.pdf")).unwrap(),
            b"%PDF waiting"
        );
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_removes_only_empty_placeholders_it_created() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("storage");
        let (bridge, _tx) = running(dir.path());

        std::fs::write(storage.join("output_tray__1.pdf"), b"%PDF undelivered").unwrap();
        std::fs::remove_file(storage.join("output_tray__3.pdf")).unwrap();

        bridge.shutdown().await;
        bridge.shutdown().await;

        assert!(storage.join("output_tray__1.pdf").exists());
        assert!(!storage.join("output_tray__2.pdf").exists());
        assert!(!storage.join("output_tray__3.pdf").exists());
        assert!(!bridge.is_running());
    }

    #[tokio::test]
    async fn submit_fills_slot_and_refuses_a_second_job() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _tx) = running(dir.path());

        bridge.submit("tray-2", b"%PDF first").unwrap();
        let placeholder = dir.path().join("storage").join("output_tray__2.pdf");
        assert_eq!(std::fs::read(&placeholder).unwrap(), b"%PDF first");

        let err = bridge.submit("tray-2", b"%PDF second").unwrap_err();
        assert!(matches!(err, TrayportError::SlotBusy(ref s) if s == "tray-2"));
        assert_eq!(std::fs::read(&placeholder).unwrap(), b"%PDF first");
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn submit_refuses_in_flight_slot() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, tx) = running(dir.path());
        let placeholder = dir.path().join("storage").join("output_tray__1.pdf");

        std::fs::write(&placeholder, b"%PDF external").unwrap();
        tx.send(placeholder.clone()).unwrap();
        for _ in 0..50 {
            if !bridge.snapshot().in_flight.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bridge.snapshot().in_flight[0].phase, SlotPhase::DebounceWait);

        // Empty the slot behind the watcher's back: still busy while in flight.
        std::fs::write(&placeholder, b"").unwrap();
        let err = bridge.submit("tray-1", b"%PDF mine").unwrap_err();
        assert!(matches!(err, TrayportError::SlotBusy(_)));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn job_left_in_a_slot_before_startup_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("storage");
        std::fs::create_dir_all(&storage).unwrap();
        std::fs::write(storage.join("output_tray__1.pdf"), b"%PDF left over").unwrap();

        let mut cfg = config(dir.path());
        cfg.debounce_ms = 20;
        let bridge = BridgeAdapter::new(&cfg);
        let (_tx, rx) = mpsc::unbounded_channel();
        bridge.run_with_events(rx).unwrap();

        for _ in 0..100 {
            if bridge.snapshot().completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(bridge.snapshot().completed, 1);

        let delivered: Vec<PathBuf> = std::fs::read_dir(&storage)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains("TRAY_1_STD"))
            .collect();
        assert_eq!(std::fs::read(&delivered[0]).unwrap(), b"%PDF left over");
        assert!(bridge.submit("tray-1", b"%PDF next").is_ok());
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn submit_rejects_unknown_slot_and_empty_payload() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _tx) = running(dir.path());

        assert!(matches!(
            bridge.submit("tray-9", b"%PDF"),
            Err(TrayportError::UnknownSlot(_))
        ));
        assert!(matches!(
            bridge.submit("tray-1", b""),
            Err(TrayportError::InvalidPayload(_))
        ));
        bridge.shutdown().await;
    }

    #[test]
    fn submit_requires_a_running_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = BridgeAdapter::new(&config(dir.path()));
        assert!(matches!(
            bridge.submit("tray-1", b"%PDF"),
            Err(TrayportError::Watch(_))
        ));
    }

    #[test]
    fn output_name_collisions_get_a_counter() {
        let dir = tempfile::tempdir().unwrap();
        let first = output_path_for(&LocalFs, dir.path(), "TRAY_1_STD", "14-03-07");
        assert_eq!(first, dir.path().join("TRAY_1_STD_14-03-07.pdf"));

        std::fs::write(&first, b"x").unwrap();
        let second = output_path_for(&LocalFs, dir.path(), "TRAY_1_STD", "14-03-07");
        assert_eq!(second, dir.path().join("TRAY_1_STD_14-03-07_1.pdf"));
    }
}
