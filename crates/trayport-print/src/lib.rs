// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Trayport print: the IPP, OS spooler and filesystem-bridge adapters, and
// the router that picks one per job.  Domain types live in `trayport-core`.

pub mod bridge;
pub mod ipp_client;
pub mod retry;
pub mod router;
pub mod spooler;

pub use bridge::{BridgeAdapter, BridgeSnapshot};
pub use ipp_client::{IppCrateTransport, IppTransport, NetworkAdapter};
pub use router::{DispatchRouter, Routes};
pub use spooler::SpoolerAdapter;
