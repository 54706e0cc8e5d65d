// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Trayport core: types, configuration, mapping resolution and error
// definitions shared across all crates.

pub mod config;
pub mod error;
pub mod mapping;
pub mod types;

pub use config::{AppConfig, BridgeConfig, SlotConfig, SpoolerConfig};
pub use error::{ErrorClass, Result, TrayportError};
pub use mapping::MappingResolver;
pub use types::*;
