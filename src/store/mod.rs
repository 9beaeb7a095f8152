//! Entity-store interfaces for the experiment lifecycle core.
//!
//! This module defines the storage abstraction the bulk coordinator, the
//! live experiment actors, and the deletion reaper work against, plus the
//! PostgreSQL backend implementation.

pub mod postgres;

pub use self::postgres::PostgresStore;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::{BulkFilter, FilterRoot};
use crate::state::State;

/// How a bulk request selects its target experiments.
///
/// Exactly one shape is honored per request; when a filter or search
/// expression is present, explicit IDs play no role in not-found reporting.
#[derive(Debug, Clone)]
pub enum TargetSelector {
    /// Explicit experiment IDs.
    Ids(Vec<i32>),
    /// Structured filter (operation default states already baked in).
    Filter(BulkFilter),
    /// Parsed search expression.
    Search(FilterRoot),
}

/// Authorization scope attached to a query by the gate.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AccessScope {
    /// No restriction beyond the query itself.
    #[default]
    Unrestricted,
    /// Only experiments in these projects are visible.
    Projects(Vec<i32>),
    /// Nothing is visible to this user for the required permissions.
    Nothing,
}

/// Candidate query for one bulk operation, compiled to SQL by the store.
///
/// The boolean requirements are set per operation by the coordinator; the
/// store applies whatever is set, regardless of target shape.
#[derive(Debug, Clone)]
pub struct ExperimentQuery {
    /// Target selection.
    pub target: TargetSelector,
    /// Restrict to experiments whose state is in this set.
    pub require_states: Option<Vec<State>>,
    /// Restrict to unarchived experiments.
    pub require_unarchived: bool,
    /// Restrict to experiments whose project and workspace are also
    /// unarchived.
    pub require_unarchived_hierarchy: bool,
    /// Restrict to archived experiments.
    pub require_archived: bool,
    /// Authorization scope; filled in by the gate.
    pub scope: AccessScope,
}

impl ExperimentQuery {
    /// A query over `target` with no additional requirements.
    pub fn new(target: TargetSelector) -> Self {
        Self {
            target,
            require_states: None,
            require_unarchived: false,
            require_unarchived_hierarchy: false,
            require_archived: false,
            scope: AccessScope::Unrestricted,
        }
    }

    /// Whether the target is an explicit ID list.
    pub fn is_explicit(&self) -> bool {
        matches!(self.target, TargetSelector::Ids(_))
    }
}

/// Experiment row as persisted, minus the config payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRow {
    /// Experiment ID.
    pub id: i32,
    /// Lifecycle state.
    pub state: State,
    /// Archived flag.
    pub archived: bool,
    /// Owning project.
    pub project_id: i32,
    /// Owning user.
    pub owner_id: i32,
}

/// Per-experiment facts the delete flow checks before accepting.
#[derive(Debug, Clone)]
pub struct DeleteCandidate {
    /// Experiment ID.
    pub id: i32,
    /// Current state.
    pub state: State,
    /// Number of model versions registered against its checkpoints.
    pub model_versions: i64,
}

/// Per-experiment facts the archive/unarchive flows check.
#[derive(Debug, Clone)]
pub struct ArchiveCandidate {
    /// Experiment ID.
    pub id: i32,
    /// Current archived flag.
    pub archived: bool,
    /// Whether the experiment is in a terminal state.
    pub terminal: bool,
}

/// Per-experiment facts the move flow checks.
#[derive(Debug, Clone)]
pub struct MoveCandidate {
    /// Experiment ID.
    pub id: i32,
    /// Whether the experiment, its project, or its workspace is archived.
    pub archived: bool,
}

/// Durable storage operations the lifecycle core depends on.
///
/// All candidate queries run the authorization-scoped [`ExperimentQuery`];
/// multi-row mutations that must be atomic (move, delete acceptance) are
/// single transactions inside the implementation.
#[async_trait]
pub trait ExperimentStore: Send + Sync {
    /// IDs of experiments matching the query.
    async fn experiment_ids(&self, query: &ExperimentQuery) -> Result<Vec<i32>>;

    /// Delete-precondition facts for experiments matching the query.
    async fn delete_candidates(&self, query: &ExperimentQuery) -> Result<Vec<DeleteCandidate>>;

    /// Archive-precondition facts for experiments matching the query.
    async fn archive_candidates(&self, query: &ExperimentQuery) -> Result<Vec<ArchiveCandidate>>;

    /// Move-precondition facts for experiments matching the query.
    async fn move_candidates(&self, query: &ExperimentQuery) -> Result<Vec<MoveCandidate>>;

    /// Current state of one experiment.
    async fn experiment_state(&self, id: i32) -> Result<Option<State>>;

    /// Set one experiment's state. The caller is responsible for having
    /// consulted the transition table.
    async fn update_experiment_state(&self, id: i32, state: State) -> Result<()>;

    /// Move the given experiments into `Deleting` in one statement and
    /// return the accepted rows.
    async fn mark_deleting(&self, ids: &[i32]) -> Result<Vec<ExperimentRow>>;

    /// Flip the archived flag and return the IDs actually updated.
    async fn set_archived(&self, ids: &[i32], archived: bool) -> Result<Vec<i32>>;

    /// Whether the project or its workspace is archived; `None` when the
    /// project does not exist.
    async fn project_hierarchy_archived(&self, project_id: i32) -> Result<Option<bool>>;

    /// Reassign the experiments, their runs, and their cached
    /// hyperparameter index to `destination_project_id` in one transaction.
    /// Returns the experiment IDs actually moved; on any failure nothing is
    /// reassigned.
    async fn move_to_project(
        &self,
        ids: &[i32],
        destination_project_id: i32,
    ) -> Result<Vec<i32>>;

    /// Patch one experiment's config with a log retention policy.
    async fn set_log_retention_config(&self, id: i32, days: i16) -> Result<()>;

    /// Update log retention for all runs of the given experiments in one
    /// transaction.
    async fn set_runs_log_retention(&self, ids: &[i32], days: i16) -> Result<()>;

    /// Experiments currently accepted for deletion, oldest first.
    async fn deleting_experiments(&self, limit: i64) -> Result<Vec<ExperimentRow>>;

    /// Remove one experiment's dependent rows (runs, checkpoints, cached
    /// hyperparameters) in one transaction. The experiment row survives.
    async fn purge_dependents(&self, id: i32) -> Result<()>;

    /// Record the terminal `Deleted` state and remove the experiment row in
    /// one transaction. Final step of deletion: a crash can only leave the
    /// experiment in `Deleting`, where the next sweep picks it up again.
    async fn delete_experiment_row(&self, id: i32) -> Result<()>;
}
