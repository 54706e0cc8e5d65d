// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: builds the adapters from the persisted config and
// exposes what the HTTP handlers need.
//
// The configuration lives behind a `Mutex` and is only ever replaced whole by
// `save_config`, which also swaps the router's routing table.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};
use trayport_core::error::{Result, TrayportError};
use trayport_core::types::Mapping;
use trayport_core::AppConfig;
use trayport_print::{
    BridgeAdapter, DispatchRouter, IppCrateTransport, IppTransport, SpoolerAdapter,
};

use super::data_dir;

/// Shared application services, cloned into every handler via axum state.
#[derive(Clone)]
pub struct AppServices {
    router: Arc<DispatchRouter>,
    bridge: Arc<BridgeAdapter>,
    spooler: Arc<SpoolerAdapter>,
    data_dir: PathBuf,
    config: Arc<Mutex<AppConfig>>,
}

impl AppServices {
    /// Initialise from the data directory with the production IPP transport.
    pub fn init() -> Result<Self> {
        let dir = data_dir::data_dir();
        info!(path = %dir.display(), "initialising app services");

        let config = match load_config(&dir)? {
            Some(config) => config,
            None => {
                info!("no config.json found, using defaults");
                AppConfig::default()
            }
        };
        Self::with_config(config, dir, Arc::new(IppCrateTransport))
    }

    /// Build services from an explicit config and transport.
    pub fn with_config(
        config: AppConfig,
        data_dir: PathBuf,
        transport: Arc<dyn IppTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = resolve_paths(&config, &data_dir);

        let spooler = Arc::new(SpoolerAdapter::new(&runtime.spooler));
        let bridge = Arc::new(BridgeAdapter::new(&runtime.bridge));
        let router = Arc::new(DispatchRouter::new(
            &runtime,
            transport,
            Arc::clone(&spooler),
            Arc::clone(&bridge),
        )?);

        info!(
            mappings = config.mappings.len(),
            printer = %config.printer_url(),
            bridge = config.bridge.enabled,
            "app services initialised"
        );

        Ok(Self {
            router,
            bridge,
            spooler,
            data_dir,
            config: Arc::new(Mutex::new(config)),
        })
    }

    fn lock_config(&self) -> MutexGuard<'_, AppConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn router(&self) -> &DispatchRouter {
        &self.router
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> AppConfig {
        self.lock_config().clone()
    }

    /// Start the filesystem bridge if the config enables it.
    pub fn start_bridge(&self) -> Result<()> {
        if !self.lock_config().bridge.enabled {
            info!("filesystem bridge disabled");
            return Ok(());
        }
        self.bridge.start()
    }

    /// Apply an administrative update: validate, persist, then swap routes.
    ///
    /// Nothing changes unless every step before the swap succeeds.
    pub fn save_config(
        &self,
        printer_ip: Option<String>,
        mappings: Option<Vec<Mapping>>,
    ) -> Result<AppConfig> {
        let mut current = self.lock_config();

        let mut updated = current.clone();
        if let Some(ip) = printer_ip {
            let ip = ip.trim().to_owned();
            if ip.is_empty() {
                return Err(TrayportError::Config("printer IP must not be empty".into()));
            }
            updated.printer_ip = ip;
        }
        if let Some(mappings) = mappings {
            updated.mappings = mappings;
        }
        updated.validate()?;

        persist_config(&self.data_dir, &updated)?;
        self.router
            .reconfigure(&resolve_paths(&updated, &self.data_dir))?;

        info!(
            printer = %updated.printer_ip,
            mappings = updated.mappings.len(),
            "configuration saved"
        );
        *current = updated.clone();
        Ok(updated)
    }

    /// Stop the bridge and delete any staged spooler files.
    pub async fn shutdown(&self) {
        self.bridge.shutdown().await;
        self.spooler.shutdown().await;
    }
}

/// Copy of `config` with relative bridge paths anchored at the data dir.
fn resolve_paths(config: &AppConfig, data_dir: &Path) -> AppConfig {
    let mut resolved = config.clone();
    if resolved.bridge.directory.is_relative() {
        resolved.bridge.directory = data_dir.join(&resolved.bridge.directory);
    }
    if let Some(out) = &resolved.bridge.output_directory
        && out.is_relative()
    {
        resolved.bridge.output_directory = Some(data_dir.join(out));
    }
    resolved
}

// -- Config file persistence -------------------------------------------------

const CONFIG_FILE: &str = "config.json";

/// Read `config.json`. A missing or unreadable file yields `None`; a file
/// that does not parse is an error.
fn load_config(data_dir: &Path) -> Result<Option<AppConfig>> {
    let path = data_dir.join(CONFIG_FILE);
    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
            return Ok(None);
        }
    };
    let config: AppConfig = serde_json::from_str(&data)
        .map_err(|e| TrayportError::Config(format!("{}: {e}", path.display())))?;
    Ok(Some(config))
}

fn persist_config(data_dir: &Path, config: &AppConfig) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join(CONFIG_FILE);
    let tmp = data_dir.join(format!("{CONFIG_FILE}.tmp"));
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use trayport_core::types::TargetDescriptor;
    use trayport_print::ipp_client::{IppReply, JobSubmission};

    use super::*;

    struct NullPrinter;

    #[async_trait]
    impl IppTransport for NullPrinter {
        async fn get_media_sources(&self, _uri: &str) -> Result<IppReply> {
            Err(TrayportError::Unreachable("offline".into()))
        }
        async fn print_job(&self, _: &str, _: &JobSubmission, _: Vec<u8>) -> Result<IppReply> {
            Err(TrayportError::Unreachable("offline".into()))
        }
    }

    fn services(dir: &Path) -> AppServices {
        AppServices::with_config(AppConfig::default(), dir.to_path_buf(), Arc::new(NullPrinter))
            .unwrap()
    }

    fn invoice_to(tray: &str) -> Vec<Mapping> {
        vec![Mapping::new(
            "invoice",
            TargetDescriptor::NetworkTray {
                tray_id: tray.into(),
            },
        )]
    }

    #[test]
    fn saved_config_is_persisted_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let svc = services(dir.path());

        svc.save_config(Some("10.0.0.43".into()), Some(invoice_to("tray-2")))
            .unwrap();

        let reloaded = load_config(dir.path()).unwrap().unwrap();
        assert_eq!(reloaded.printer_ip, "10.0.0.43");
        assert_eq!(reloaded.mappings, invoice_to("tray-2"));
        assert_eq!(svc.config().printer_ip, "10.0.0.43");
        assert!(svc.router().routes().resolver.resolve("invoice").is_ok());
    }

    #[test]
    fn invalid_update_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = services(dir.path());
        svc.save_config(None, Some(invoice_to("tray-1"))).unwrap();

        let mut dupes = invoice_to("tray-1");
        dupes.extend(invoice_to("auto"));
        let err = svc.save_config(Some("10.9.9.9".into()), Some(dupes)).unwrap_err();
        assert!(matches!(err, TrayportError::Config(_)));

        assert_eq!(svc.config().printer_ip, "192.168.1.50");
        assert_eq!(load_config(dir.path()).unwrap().unwrap().mappings, invoice_to("tray-1"));
    }

    #[test]
    fn missing_file_is_none_and_garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(dir.path()).unwrap().is_none());

        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"mappings":[{"name":"x","tray":"auto","printer":"P"}]}"#,
        )
        .unwrap();
        assert!(load_config(dir.path()).is_err());
    }

    #[test]
    fn relative_bridge_directory_is_anchored_in_data_dir() {
        let config = AppConfig::default();
        let resolved = resolve_paths(&config, Path::new("/var/lib/trayport"));
        assert_eq!(
            resolved.bridge.directory,
            Path::new("/var/lib/trayport/storage")
        );
        assert_eq!(config.bridge.directory, Path::new("storage"));
    }
}
