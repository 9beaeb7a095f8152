// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-wide registry of live experiment handles.
//!
//! Every non-terminal experiment has exactly one entry here; a terminal
//! experiment has none. The registry is the authoritative place to deliver
//! lifecycle commands to a running experiment, and `load` returning `None`
//! is the normal way callers learn an experiment already terminated - it is
//! a frequent outcome of racing with termination, not a fault.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{CoreError, Result};
use crate::experiment::ExperimentHandle;

/// Concurrent map from experiment ID to live handle.
///
/// Safe for concurrent `load`/`insert`/`remove` from any number of bulk
/// requests and lifecycle loops. The lifecycle loop owns its entry: it
/// inserts on spawn and removes itself on termination.
#[derive(Debug, Default)]
pub struct ExperimentRegistry {
    inner: DashMap<i32, ExperimentHandle>,
}

impl ExperimentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the live handle for an experiment.
    ///
    /// `None` means the experiment is terminal (or was never spawned);
    /// callers must treat that as a state, not an error.
    pub fn load(&self, id: i32) -> Option<ExperimentHandle> {
        self.inner.get(&id).map(|entry| entry.value().clone())
    }

    /// Register a live handle. At most one handle may exist per ID.
    pub fn insert(&self, id: i32, handle: ExperimentHandle) -> Result<()> {
        match self.inner.entry(id) {
            Entry::Occupied(_) => Err(CoreError::AlreadyRegistered { id }),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Deregister an experiment. Called by its lifecycle loop on
    /// termination.
    pub fn remove(&self, id: i32) -> Option<ExperimentHandle> {
        self.inner.remove(&id).map(|(_, handle)| handle)
    }

    /// Whether a live handle exists for this ID.
    pub fn contains(&self, id: i32) -> bool {
        self.inner.contains_key(&id)
    }

    /// Number of live experiments.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no experiments are live.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
