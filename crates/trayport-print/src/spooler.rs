// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OS spooler adapter: stage the payload as a temp file and hand it to `lp`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use trayport_core::config::SpoolerConfig;
use trayport_core::error::{Result, TrayportError};

/// Adapter for printers installed in the local print subsystem.
pub struct SpoolerAdapter {
    program: String,
    list_program: String,
    list_args: Vec<String>,
    staging_dir: PathBuf,
    grace: Duration,
    cleanup: CleanupQueue,
}

impl SpoolerAdapter {
    pub fn new(config: &SpoolerConfig) -> Self {
        Self {
            program: config.program.clone(),
            list_program: config.list_program.clone(),
            list_args: config.list_args.clone(),
            staging_dir: config
                .staging_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            grace: Duration::from_millis(config.cleanup_grace_ms),
            cleanup: CleanupQueue::default(),
        }
    }

    /// Names of the printers the spooler knows about, in its order.
    #[instrument(skip(self), fields(program = %self.list_program))]
    pub async fn list_printers(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.list_program)
            .args(&self.list_args)
            .output()
            .await
            .map_err(|e| {
                TrayportError::SpoolerRejected(format!("could not run {}: {e}", self.list_program))
            })?;

        if !output.status.success() {
            return Err(TrayportError::SpoolerRejected(failure_detail(
                &self.list_program,
                &output,
            )));
        }

        let printers: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        debug!(count = printers.len(), "printers listed");
        Ok(printers)
    }

    /// Stage `payload` and submit it to `printer_name`.
    ///
    /// Returns the spooler's request id when it prints one. The staged file
    /// is scheduled for deletion on every path, success or failure.
    #[instrument(skip(self, payload), fields(printer = %printer_name, bytes = payload.len()))]
    pub async fn submit(&self, payload: &[u8], printer_name: &str) -> Result<Option<String>> {
        let path = self.staging_path();
        let result = self.stage_and_spool(&path, payload, printer_name).await;
        self.cleanup.schedule(path, self.grace);
        result
    }

    /// Cancel the cleanup timers and delete every staged file still waiting
    /// for its grace period.
    pub async fn shutdown(&self) {
        self.cleanup.flush().await;
    }

    /// Staged files not yet deleted.
    pub fn pending_cleanups(&self) -> usize {
        self.cleanup.len()
    }

    async fn stage_and_spool(
        &self,
        path: &Path,
        payload: &[u8],
        printer_name: &str,
    ) -> Result<Option<String>> {
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| {
                TrayportError::StagingFailed(format!("{}: {e}", self.staging_dir.display()))
            })?;
        tokio::fs::write(path, payload)
            .await
            .map_err(|e| TrayportError::StagingFailed(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "payload staged");

        let output = Command::new(&self.program)
            .arg("-d")
            .arg(printer_name)
            .arg(path)
            .output()
            .await
            .map_err(|e| {
                TrayportError::SpoolerRejected(format!("could not run {}: {e}", self.program))
            })?;

        if !output.status.success() {
            let detail = failure_detail(&self.program, &output);
            warn!(printer = %printer_name, %detail, "spooler refused job");
            return Err(TrayportError::SpoolerRejected(detail));
        }

        let request_id = parse_request_id(&String::from_utf8_lossy(&output.stdout));
        info!(printer = %printer_name, request_id = ?request_id, "job handed to spooler");
        Ok(request_id)
    }

    fn staging_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
        let suffix = Uuid::new_v4().simple();
        self.staging_dir
            .join(format!("trayport_{stamp}_{suffix}.pdf"))
    }
}

/// `lp` answers `request id is <id> (1 file(s))`.
fn parse_request_id(stdout: &str) -> Option<String> {
    let rest = stdout.split("request id is").nth(1)?;
    rest.split_whitespace().next().map(str::to_owned)
}

fn failure_detail(program: &str, output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("{program} exited with {}", output.status)
    } else {
        format!("{program}: {stderr}")
    }
}

/// Staged files awaiting deletion, each with a timer owned by the queue.
#[derive(Default)]
struct CleanupQueue {
    pending: Arc<Mutex<HashSet<PathBuf>>>,
    timers: Mutex<JoinSet<()>>,
}

impl CleanupQueue {
    fn schedule(&self, path: PathBuf, grace: Duration) {
        lock(&self.pending).insert(path.clone());

        let pending = Arc::clone(&self.pending);
        let mut timers = self.timers();
        // Reap finished timers so the set only holds live ones.
        while timers.try_join_next().is_some() {}
        timers.spawn(async move {
            tokio::time::sleep(grace).await;
            // False if a flush already took it.
            let claimed = lock(&pending).remove(&path);
            if claimed {
                remove_staged(&path).await;
            }
        });
    }

    fn timers(&self) -> MutexGuard<'_, JoinSet<()>> {
        lock(&self.timers)
    }

    async fn flush(&self) {
        let mut timers = std::mem::take(&mut *self.timers());
        timers.abort_all();
        while timers.join_next().await.is_some() {}

        let paths: Vec<PathBuf> = lock(&self.pending).drain().collect();
        for path in paths {
            remove_staged(&path).await;
        }
    }

    fn len(&self) -> usize {
        lock(&self.pending).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "staged file removed"),
        // Staging failed before the file was created.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove staged file"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn config(dir: &Path, program: &str) -> SpoolerConfig {
        SpoolerConfig {
            program: program.into(),
            list_program: "printf".into(),
            list_args: vec!["Zebra\\n\\nOffice-Laser\\n".into()],
            staging_dir: Some(dir.to_path_buf()),
            cleanup_grace_ms: 200,
        }
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn staged_file_is_removed_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SpoolerAdapter::new(&config(dir.path(), "true"));

        adapter.submit(b"%PDF-1.7", "Zebra").await.unwrap();
        assert_eq!(staged_files(dir.path()), 1);

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(staged_files(dir.path()), 0);
        assert_eq!(adapter.pending_cleanups(), 0);
    }

    #[tokio::test]
    async fn staged_file_is_removed_after_spooler_failure() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SpoolerAdapter::new(&config(dir.path(), "false"));

        let err = adapter.submit(b"%PDF-1.7", "Nowhere").await.unwrap_err();
        assert!(matches!(err, TrayportError::SpoolerRejected(_)));

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn missing_spooler_program_is_a_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SpoolerAdapter::new(&config(dir.path(), "/nonexistent/trayport-lp"));

        let err = adapter.submit(b"%PDF-1.7", "Zebra").await.unwrap_err();
        assert!(matches!(err, TrayportError::SpoolerRejected(_)));
    }

    #[tokio::test]
    async fn unwritable_staging_dir_is_staging_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let adapter = SpoolerAdapter::new(&config(&blocker, "true"));

        let err = adapter.submit(b"%PDF-1.7", "Zebra").await.unwrap_err();
        assert!(matches!(err, TrayportError::StagingFailed(_)));
    }

    #[tokio::test]
    async fn shutdown_removes_pending_files_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), "true");
        cfg.cleanup_grace_ms = 60_000;
        let adapter = SpoolerAdapter::new(&cfg);

        adapter.submit(b"%PDF-1.7", "Zebra").await.unwrap();
        assert_eq!(adapter.pending_cleanups(), 1);

        assert_eq!(adapter.cleanup.timers().len(), 1);

        adapter.shutdown().await;
        assert_eq!(staged_files(dir.path()), 0);
        assert_eq!(adapter.pending_cleanups(), 0);
        assert!(adapter.cleanup.timers().is_empty());
    }

    #[tokio::test]
    async fn finished_timers_are_not_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), "true");
        cfg.cleanup_grace_ms = 10;
        let adapter = SpoolerAdapter::new(&cfg);

        adapter.submit(b"%PDF-1.7", "Zebra").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(adapter.pending_cleanups(), 0);

        adapter.submit(b"%PDF-1.7", "Zebra").await.unwrap();
        assert_eq!(adapter.cleanup.timers().len(), 1);
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn printers_are_listed_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SpoolerAdapter::new(&config(dir.path(), "true"));

        let printers = adapter.list_printers().await.unwrap();
        assert_eq!(printers, vec!["Zebra".to_owned(), "Office-Laser".to_owned()]);
    }

    #[test]
    fn request_id_is_read_from_lp_output() {
        assert_eq!(
            parse_request_id("request id is Zebra-42 (1 file(s))\n").as_deref(),
            Some("Zebra-42")
        );
        assert_eq!(parse_request_id(""), None);
    }

    #[test]
    fn staging_names_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SpoolerAdapter::new(&config(dir.path(), "true"));
        assert_ne!(adapter.staging_path(), adapter.staging_path());
    }
}
