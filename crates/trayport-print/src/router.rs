// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Dispatch router: resolve a document type and hand the job to one adapter.
//
// The router never retries. Mappings and the network adapter are read from a
// snapshot taken at the start of each dispatch, so a concurrent
// `reconfigure` never changes the target of a job already under way.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, info, instrument};

use trayport_core::config::AppConfig;
use trayport_core::error::Result;
use trayport_core::mapping::MappingResolver;
use trayport_core::types::{DispatchOutcome, JobStatus, PrintJob, TargetDescriptor};

use crate::bridge::BridgeAdapter;
use crate::ipp_client::{IppTransport, NetworkAdapter};
use crate::spooler::SpoolerAdapter;

/// Everything that `PUT /config` can change, swapped as one unit.
pub struct Routes {
    pub resolver: MappingResolver,
    pub network: NetworkAdapter,
}

pub struct DispatchRouter {
    routes: RwLock<Arc<Routes>>,
    transport: Arc<dyn IppTransport>,
    spooler: Arc<SpoolerAdapter>,
    bridge: Arc<BridgeAdapter>,
}

impl DispatchRouter {
    pub fn new(
        config: &AppConfig,
        transport: Arc<dyn IppTransport>,
        spooler: Arc<SpoolerAdapter>,
        bridge: Arc<BridgeAdapter>,
    ) -> Result<Self> {
        let routes = build_routes(config, &transport)?;
        Ok(Self {
            routes: RwLock::new(Arc::new(routes)),
            transport,
            spooler,
            bridge,
        })
    }

    /// Current routing snapshot.
    pub fn routes(&self) -> Arc<Routes> {
        let guard = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Validate `config` and atomically replace the mappings and printer.
    pub fn reconfigure(&self, config: &AppConfig) -> Result<()> {
        config.validate()?;
        let routes = Arc::new(build_routes(config, &self.transport)?);
        *self.routes.write().unwrap_or_else(PoisonError::into_inner) = routes;
        info!(mappings = config.mappings.len(), printer = %config.printer_ip, "routing table replaced");
        Ok(())
    }

    pub fn spooler(&self) -> &SpoolerAdapter {
        &self.spooler
    }

    pub fn bridge(&self) -> &BridgeAdapter {
        &self.bridge
    }

    /// Resolve `doc_type` and dispatch `payload` to its target.
    pub async fn dispatch(&self, doc_type: &str, payload: Vec<u8>) -> Result<DispatchOutcome> {
        let routes = self.routes();
        let target = routes.resolver.resolve(doc_type)?.clone();
        self.run(&routes, PrintJob::new(doc_type, payload, target)).await
    }

    /// Dispatch straight to `target`, bypassing the mapping table.
    pub async fn dispatch_to(
        &self,
        doc_type: &str,
        target: TargetDescriptor,
        payload: Vec<u8>,
    ) -> Result<DispatchOutcome> {
        let routes = self.routes();
        self.run(&routes, PrintJob::new(doc_type, payload, target)).await
    }

    #[instrument(
        skip_all,
        fields(job_id = %job.id, doc_type = %job.doc_type, target = %job.target)
    )]
    async fn run(&self, routes: &Routes, mut job: PrintJob) -> Result<DispatchOutcome> {
        let payload_bytes = job.payload.len();
        let digest = job.payload_digest();
        info!(payload_bytes, %digest, backend = job.target.backend(), "dispatching job");

        job.status = JobStatus::Submitted;
        let payload = std::mem::take(&mut job.payload);
        let result = match &job.target {
            TargetDescriptor::NetworkTray { tray_id } => {
                routes.network.submit(payload, tray_id).await
            }
            TargetDescriptor::SpoolerPrinter { printer_name } => {
                self.spooler.submit(&payload, printer_name).await
            }
            TargetDescriptor::BridgeSlot { slot_id } => {
                self.bridge.submit(slot_id, &payload).map(|()| None)
            }
        };

        match result {
            Ok(backend_job_id) => {
                job.status = JobStatus::Succeeded;
                job.backend_job_id = backend_job_id;
                info!(
                    backend_job_id = ?job.backend_job_id,
                    elapsed_ms = (chrono::Utc::now() - job.created_at).num_milliseconds(),
                    "job dispatched"
                );
                Ok(DispatchOutcome {
                    job_id: job.id,
                    backend_job_id: job.backend_job_id,
                })
            }
            Err(err) => {
                job.status = JobStatus::Failed;
                job.error = Some(err.to_string());
                error!(
                    payload_bytes,
                    %digest,
                    created_at = %job.created_at,
                    error = %err,
                    "dispatch failed"
                );
                Err(err)
            }
        }
    }
}

fn build_routes(config: &AppConfig, transport: &Arc<dyn IppTransport>) -> Result<Routes> {
    Ok(Routes {
        resolver: MappingResolver::new(&config.mappings)?,
        network: NetworkAdapter::new(config, Arc::clone(transport)),
    })
}
