// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer. Owns the adapters and the persisted configuration, and
// gives the HTTP handlers one place to call.

pub mod app_services;
pub mod data_dir;
