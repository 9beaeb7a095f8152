// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource-manager adapter contract.
//!
//! The lifecycle core never talks to a scheduler directly; it goes through
//! this trait so that cluster-specific backends (or none at all) can be
//! swapped in. All operations here are best-effort cleanup hooks: the
//! deletion flow calls them after the database work and treats failures as
//! a reason to mark the experiment `DELETE_FAILED`, never to crash.

use async_trait::async_trait;

use crate::error::Result;
use tracing::debug;

/// Scheduler-side operations the lifecycle core depends on.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// The namespace workloads land in when a workspace has not bound one.
    async fn default_namespace(&self, cluster: &str) -> Result<String>;

    /// Whether the namespace exists on the given cluster.
    async fn verify_namespace_exists(&self, namespace: &str, cluster: &str) -> Result<bool>;

    /// Remove a namespace if nothing is running in it. Idempotent: removing
    /// a namespace that is absent or still busy is a success.
    async fn remove_empty_namespace(&self, namespace: &str, cluster: &str) -> Result<()>;

    /// Delete an auto-generated namespace outright. Called by the deletion
    /// reaper for namespaces this platform created itself.
    async fn delete_namespace(&self, auto_generated_name: &str) -> Result<()>;
}

/// Resource manager for deployments without an external scheduler. Every
/// operation succeeds and only leaves a trace in the logs.
#[derive(Debug, Default)]
pub struct NoopResourceManager;

#[async_trait]
impl ResourceManager for NoopResourceManager {
    async fn default_namespace(&self, _cluster: &str) -> Result<String> {
        Ok("default".to_string())
    }

    async fn verify_namespace_exists(&self, _namespace: &str, _cluster: &str) -> Result<bool> {
        Ok(true)
    }

    async fn remove_empty_namespace(&self, namespace: &str, cluster: &str) -> Result<()> {
        debug!(namespace, cluster, "no scheduler attached, skipping namespace removal");
        Ok(())
    }

    async fn delete_namespace(&self, auto_generated_name: &str) -> Result<()> {
        debug!(
            namespace = auto_generated_name,
            "no scheduler attached, skipping namespace deletion"
        );
        Ok(())
    }
}
