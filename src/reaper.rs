// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background deletion reaper.
//!
//! Accepting a delete request only moves experiments into `DELETING`; the
//! actual teardown happens here, asynchronously. Each sweep picks up a
//! batch of accepted experiments, purges their dependent rows, releases
//! scheduler-side resources, and finally drops the experiment row. A
//! failure at any step marks the experiment `DELETE_FAILED` so a later
//! delete request can retry it; the reaper never rolls back or retries on
//! its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::resource_manager::ResourceManager;
use crate::state::State;
use crate::store::ExperimentStore;

/// Experiments processed per sweep.
const SWEEP_BATCH_LIMIT: i64 = 64;

/// Handle to a running reaper task.
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the reaper to stop and wait for the current sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the deletion reaper, sweeping once per `interval`.
pub fn spawn_reaper(
    store: Arc<dyn ExperimentStore>,
    resource_manager: Arc<dyn ResourceManager>,
    interval: Duration,
) -> ReaperHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "deletion reaper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sweep(store.as_ref(), resource_manager.as_ref()).await {
                        warn!(error = %e, "deletion sweep failed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("deletion reaper stopping");
                        break;
                    }
                }
            }
        }
    });
    ReaperHandle {
        shutdown: shutdown_tx,
        task,
    }
}

/// Namespace this platform auto-generates for an experiment's workloads.
fn experiment_namespace(id: i32) -> String {
    format!("tracelab-exp-{id}")
}

/// Cluster the auto-generated namespaces live on. Multi-cluster routing
/// stays in the resource-manager backends.
const DEFAULT_CLUSTER: &str = "default";

/// Release scheduler-side resources for one experiment.
///
/// An auto-generated namespace is deleted outright; when none exists the
/// experiment ran in the shared namespace, which is removed only if empty.
async fn release_namespaces(resource_manager: &dyn ResourceManager, id: i32) -> Result<()> {
    let namespace = experiment_namespace(id);
    if resource_manager
        .verify_namespace_exists(&namespace, DEFAULT_CLUSTER)
        .await?
    {
        resource_manager.delete_namespace(&namespace).await?;
    } else {
        let shared = resource_manager.default_namespace(DEFAULT_CLUSTER).await?;
        resource_manager
            .remove_empty_namespace(&shared, DEFAULT_CLUSTER)
            .await?;
    }
    Ok(())
}

/// One sweep over the accepted-for-deletion experiments.
pub(crate) async fn sweep(
    store: &dyn ExperimentStore,
    resource_manager: &dyn ResourceManager,
) -> Result<()> {
    let batch = store.deleting_experiments(SWEEP_BATCH_LIMIT).await?;
    if batch.is_empty() {
        return Ok(());
    }
    debug!(count = batch.len(), "sweeping experiments accepted for deletion");

    for row in batch {
        if let Err(e) = reap_one(store, resource_manager, row.id).await {
            warn!(experiment_id = row.id, error = %e, "experiment deletion failed");
            if let Err(mark_err) = store
                .update_experiment_state(row.id, State::DeleteFailed)
                .await
            {
                warn!(
                    experiment_id = row.id,
                    error = %mark_err,
                    "could not record deletion failure"
                );
            }
        }
    }
    Ok(())
}

async fn reap_one(
    store: &dyn ExperimentStore,
    resource_manager: &dyn ResourceManager,
    id: i32,
) -> Result<()> {
    store.purge_dependents(id).await?;
    release_namespaces(resource_manager, id).await?;
    // The store records DELETED and drops the row atomically; up to this
    // point the experiment is still DELETING and a crash re-sweeps it.
    store.delete_experiment_row(id).await?;
    info!(experiment_id = id, "experiment deleted");
    Ok(())
}
