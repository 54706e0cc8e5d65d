// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filesystem operations used by the bridge.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

/// Every filesystem effect the bridge performs.
///
/// The watcher only ever talks to this trait, so a test can stand in for a
/// downstream process that holds a slot file open.
pub trait SlotFs: Send + Sync + 'static {
    /// Size of the file at `path` in bytes.
    fn size(&self, path: &Path) -> io::Result<u64>;

    fn exists(&self, path: &Path) -> bool;

    /// Atomically move `from` to `to`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Create an empty file at `path` unless something is already there.
    /// Returns `true` if this call created it.
    fn create_placeholder(&self, path: &Path) -> io::Result<bool>;

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// [`SlotFs`] on the local disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl SlotFs for LocalFs {
    fn size(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(path).map(|m| m.len())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn create_placeholder(&self, path: &Path) -> io::Result<bool> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        fs::write(path, data)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_never_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output_tray__1.pdf");

        assert!(LocalFs.create_placeholder(&path).unwrap());
        assert_eq!(LocalFs.size(&path).unwrap(), 0);

        LocalFs.write(&path, b"%PDF").unwrap();
        assert!(!LocalFs.create_placeholder(&path).unwrap());
        assert_eq!(LocalFs.size(&path).unwrap(), 4);
    }
}
