// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mapping resolution: logical document type -> physical target.

use std::collections::HashMap;

use crate::error::{Result, TrayportError};
use crate::types::{Mapping, TargetDescriptor};

/// Immutable lookup table built from the configured mappings.
///
/// Lookup is an exact string match. There is no fallback: a document type
/// that should print to a tray of the same name needs an explicit mapping.
#[derive(Debug, Clone, Default)]
pub struct MappingResolver {
    targets: HashMap<String, TargetDescriptor>,
}

impl MappingResolver {
    /// Build a resolver, rejecting duplicate names.
    pub fn new(mappings: &[Mapping]) -> Result<Self> {
        let mut targets = HashMap::with_capacity(mappings.len());
        for mapping in mappings {
            if targets
                .insert(mapping.name.clone(), mapping.target.clone())
                .is_some()
            {
                return Err(TrayportError::Config(format!(
                    "duplicate mapping name '{}'",
                    mapping.name
                )));
            }
        }
        Ok(Self { targets })
    }

    /// Resolve a document type to its target.
    pub fn resolve(&self, doc_type: &str) -> Result<&TargetDescriptor> {
        self.targets
            .get(doc_type)
            .ok_or_else(|| TrayportError::MappingNotFound(doc_type.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
