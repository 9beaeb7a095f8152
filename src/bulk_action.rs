// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bulk experiment action coordination.
//!
//! Every bulk operation follows the same shape: resolve the target set
//! (explicit IDs, structured filter, or search expression) through the
//! authorization gate, check per-experiment preconditions, apply the
//! mutation, and report one [`ActionResult`] per affected experiment.
//!
//! Failures are partial by design: one experiment refusing an action never
//! blocks the rest. Only malformed requests and infrastructure failures
//! abort the whole call. Not-found entries are reported only for requests
//! that named IDs explicitly; filter and search requests simply act on
//! whatever matched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::authz::{AuthorizationGate, Permission, UserContext};
use crate::error::{CoreError, Result};
use crate::filter::{parse_search, BulkFilter};
use crate::registry::ExperimentRegistry;
use crate::state::{State, NON_TERMINAL_STATES, TERMINAL_STATES};
use crate::store::{
    DeleteCandidate, ExperimentQuery, ExperimentRow, ExperimentStore, TargetSelector,
};

/// Outcome of a bulk action for one experiment.
#[derive(Debug)]
pub struct ActionResult {
    /// The experiment the outcome applies to.
    pub id: i32,
    /// `None` on success; the per-experiment failure otherwise.
    pub error: Option<CoreError>,
}

impl ActionResult {
    fn ok(id: i32) -> Self {
        Self { id, error: None }
    }

    fn failed(id: i32, error: CoreError) -> Self {
        Self {
            id,
            error: Some(error),
        }
    }

    /// Whether the action succeeded for this experiment.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Lifecycle commands the coordinator can fan out to live experiments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleOp {
    Activate,
    Pause,
    Cancel,
    Kill,
}

impl LifecycleOp {
    /// Default state set applied when a structured filter names no states.
    fn default_states(self) -> &'static [State] {
        match self {
            LifecycleOp::Activate => &[State::Paused],
            LifecycleOp::Pause => &[State::Active],
            LifecycleOp::Cancel | LifecycleOp::Kill => &NON_TERMINAL_STATES,
        }
    }

    /// Whether a missing registry entry (already terminal) satisfies the
    /// caller's intent.
    fn terminal_is_success(self) -> bool {
        matches!(self, LifecycleOp::Cancel | LifecycleOp::Kill)
    }
}

/// Shared state for coordinating bulk experiment actions.
///
/// Holds the entity store, the authorization gate, and the registry of
/// live experiments; cloned cheaply into request handlers.
#[derive(Clone)]
pub struct BulkActionState {
    store: Arc<dyn ExperimentStore>,
    authz: Arc<dyn AuthorizationGate>,
    registry: Arc<ExperimentRegistry>,
}

/// Build the target selector for a request, baking the operation's default
/// states into a structured filter that names none.
///
/// A request carrying both a filter and a search expression is malformed.
fn build_target(
    ids: &[i32],
    filter: Option<&BulkFilter>,
    search: Option<&str>,
    default_states: Option<&[State]>,
) -> Result<TargetSelector> {
    match (filter, search) {
        (Some(_), Some(_)) => Err(CoreError::MalformedFilter {
            details: "request carries both a filter and a search expression".to_string(),
        }),
        (None, Some(expr)) => Ok(TargetSelector::Search(parse_search(expr)?)),
        (Some(filter), None) => {
            let mut filter = filter.clone();
            if filter.states.is_none() {
                filter.states = default_states.map(|states| states.to_vec());
            }
            Ok(TargetSelector::Filter(filter))
        }
        (None, None) => Ok(TargetSelector::Ids(ids.to_vec())),
    }
}

impl BulkActionState {
    /// Create the coordinator over its collaborators.
    pub fn new(
        store: Arc<dyn ExperimentStore>,
        authz: Arc<dyn AuthorizationGate>,
        registry: Arc<ExperimentRegistry>,
    ) -> Self {
        Self {
            store,
            authz,
            registry,
        }
    }

    /// Activate the targeted experiments (paused -> active).
    #[instrument(skip_all, fields(user_id = user.user_id))]
    pub async fn activate_experiments(
        &self,
        user: &UserContext,
        ids: &[i32],
        filter: Option<&BulkFilter>,
        search: Option<&str>,
    ) -> Result<Vec<ActionResult>> {
        self.lifecycle(user, ids, filter, search, LifecycleOp::Activate)
            .await
    }

    /// Pause the targeted experiments (active -> paused).
    #[instrument(skip_all, fields(user_id = user.user_id))]
    pub async fn pause_experiments(
        &self,
        user: &UserContext,
        ids: &[i32],
        filter: Option<&BulkFilter>,
        search: Option<&str>,
    ) -> Result<Vec<ActionResult>> {
        self.lifecycle(user, ids, filter, search, LifecycleOp::Pause)
            .await
    }

    /// Gracefully cancel the targeted experiments. Already-terminal targets
    /// count as success.
    #[instrument(skip_all, fields(user_id = user.user_id))]
    pub async fn cancel_experiments(
        &self,
        user: &UserContext,
        ids: &[i32],
        filter: Option<&BulkFilter>,
        search: Option<&str>,
    ) -> Result<Vec<ActionResult>> {
        self.lifecycle(user, ids, filter, search, LifecycleOp::Cancel)
            .await
    }

    /// Forcefully kill the targeted experiments. Already-terminal targets
    /// count as success.
    #[instrument(skip_all, fields(user_id = user.user_id))]
    pub async fn kill_experiments(
        &self,
        user: &UserContext,
        ids: &[i32],
        filter: Option<&BulkFilter>,
        search: Option<&str>,
    ) -> Result<Vec<ActionResult>> {
        self.lifecycle(user, ids, filter, search, LifecycleOp::Kill)
            .await
    }

    async fn lifecycle(
        &self,
        user: &UserContext,
        ids: &[i32],
        filter: Option<&BulkFilter>,
        search: Option<&str>,
        op: LifecycleOp,
    ) -> Result<Vec<ActionResult>> {
        let target = build_target(ids, filter, search, Some(op.default_states()))?;
        let mut query = ExperimentQuery::new(target);
        let explicit = query.is_explicit();
        if !explicit && !op.terminal_is_success() {
            // Filter/search activation and pausing skip archived rows; an
            // archived experiment is terminal and cannot take either.
            query.require_unarchived = true;
        }
        let query = self
            .authz
            .filter_query(user, query, &[Permission::UpdateExperiment])
            .await?;
        let visible = self.store.experiment_ids(&query).await?;

        let mut results = Vec::new();
        if explicit {
            let visible: HashSet<i32> = visible.into_iter().collect();
            for &id in ids {
                if visible.contains(&id) {
                    results.push(self.dispatch(op, id).await);
                } else {
                    results.push(ActionResult::failed(id, CoreError::ExperimentNotFound { id }));
                }
            }
        } else {
            for id in visible {
                results.push(self.dispatch(op, id).await);
            }
        }
        debug!(
            total = results.len(),
            failed = results.iter().filter(|r| !r.is_ok()).count(),
            op = ?op,
            "bulk lifecycle action finished"
        );
        Ok(results)
    }

    async fn dispatch(&self, op: LifecycleOp, id: i32) -> ActionResult {
        let Some(handle) = self.registry.load(id) else {
            // No live handle: the experiment is terminal.
            return if op.terminal_is_success() {
                ActionResult::ok(id)
            } else {
                ActionResult::failed(id, CoreError::TerminalState { id })
            };
        };
        let outcome = match op {
            LifecycleOp::Activate => handle.activate().await,
            LifecycleOp::Pause => handle.pause().await,
            LifecycleOp::Cancel => handle.cancel().await,
            LifecycleOp::Kill => handle.kill().await,
        };
        match outcome {
            Ok(()) => ActionResult::ok(id),
            // Raced with termination after the load.
            Err(CoreError::TerminalState { .. }) if op.terminal_is_success() => {
                ActionResult::ok(id)
            }
            Err(e) => ActionResult::failed(id, e),
        }
    }

    /// Accept the targeted experiments for deletion.
    ///
    /// Accepted experiments move to `DELETING` in one statement; the
    /// returned rows are what the deletion reaper will pick up. Experiments
    /// with registered model versions or in a non-deletable state are
    /// refused individually.
    #[instrument(skip_all, fields(user_id = user.user_id))]
    pub async fn delete_experiments(
        &self,
        user: &UserContext,
        ids: &[i32],
        filter: Option<&BulkFilter>,
        search: Option<&str>,
    ) -> Result<(Vec<ActionResult>, Vec<ExperimentRow>)> {
        let target = build_target(ids, filter, search, None)?;
        let mut query = ExperimentQuery::new(target);
        let explicit = query.is_explicit();
        if !explicit {
            query.require_states = Some(TERMINAL_STATES.to_vec());
        }
        let query = self
            .authz
            .filter_query(user, query, &[Permission::DeleteExperiment])
            .await?;
        let candidates = self.store.delete_candidates(&query).await?;
        let by_id: HashMap<i32, &DeleteCandidate> =
            candidates.iter().map(|c| (c.id, c)).collect();

        let ordered: Vec<i32> = if explicit {
            ids.to_vec()
        } else {
            candidates.iter().map(|c| c.id).collect()
        };

        let mut accepted = Vec::new();
        let mut verdicts: Vec<(i32, Option<CoreError>)> = Vec::new();
        for id in ordered {
            match by_id.get(&id) {
                None => {
                    verdicts.push((id, Some(CoreError::ExperimentNotFound { id })));
                }
                Some(candidate) if candidate.model_versions > 0 => {
                    verdicts.push((id, Some(CoreError::RegisteredModelVersions { id })));
                }
                Some(candidate) if !candidate.state.is_deletable() => {
                    verdicts.push((
                        id,
                        Some(CoreError::NotDeletable {
                            id,
                            state: candidate.state,
                        }),
                    ));
                }
                Some(_) => {
                    accepted.push(id);
                    verdicts.push((id, None));
                }
            }
        }

        let rows = self.store.mark_deleting(&accepted).await?;
        let marked: HashSet<i32> = rows.iter().map(|row| row.id).collect();

        let results = verdicts
            .into_iter()
            .map(|(id, error)| match error {
                Some(error) => ActionResult::failed(id, error),
                // Accepted but gone by the time the update ran.
                None if !marked.contains(&id) => {
                    ActionResult::failed(id, CoreError::ExperimentNotFound { id })
                }
                None => ActionResult::ok(id),
            })
            .collect();
        debug!(accepted = rows.len(), "experiments accepted for deletion");
        Ok((results, rows))
    }

    /// Archive the targeted experiments. Only terminal, unarchived
    /// experiments qualify.
    #[instrument(skip_all, fields(user_id = user.user_id))]
    pub async fn archive_experiments(
        &self,
        user: &UserContext,
        ids: &[i32],
        filter: Option<&BulkFilter>,
        search: Option<&str>,
    ) -> Result<Vec<ActionResult>> {
        self.set_archive_flag(user, ids, filter, search, true).await
    }

    /// Unarchive the targeted experiments.
    #[instrument(skip_all, fields(user_id = user.user_id))]
    pub async fn unarchive_experiments(
        &self,
        user: &UserContext,
        ids: &[i32],
        filter: Option<&BulkFilter>,
        search: Option<&str>,
    ) -> Result<Vec<ActionResult>> {
        self.set_archive_flag(user, ids, filter, search, false).await
    }

    async fn set_archive_flag(
        &self,
        user: &UserContext,
        ids: &[i32],
        filter: Option<&BulkFilter>,
        search: Option<&str>,
        archived: bool,
    ) -> Result<Vec<ActionResult>> {
        let target = build_target(ids, filter, search, None)?;
        let mut query = ExperimentQuery::new(target);
        let explicit = query.is_explicit();
        if !explicit {
            query.require_states = Some(TERMINAL_STATES.to_vec());
            if archived {
                query.require_unarchived = true;
            } else {
                query.require_archived = true;
            }
        }
        let query = self
            .authz
            .filter_query(user, query, &[Permission::UpdateExperimentMetadata])
            .await?;
        let candidates = self.store.archive_candidates(&query).await?;
        let by_id: HashMap<i32, (bool, bool)> = candidates
            .iter()
            .map(|c| (c.id, (c.archived, c.terminal)))
            .collect();

        let ordered: Vec<i32> = if explicit {
            ids.to_vec()
        } else {
            candidates.iter().map(|c| c.id).collect()
        };

        let mut accepted = Vec::new();
        let mut verdicts: Vec<(i32, Option<CoreError>)> = Vec::new();
        for id in ordered {
            let verdict = match by_id.get(&id) {
                None => Some(CoreError::ExperimentNotFound { id }),
                Some((true, _)) if archived => Some(CoreError::AlreadyArchived { id }),
                Some((false, _)) if !archived => Some(CoreError::NotArchived { id }),
                Some((_, false)) => Some(CoreError::NotTerminal { id }),
                Some(_) => None,
            };
            if verdict.is_none() {
                accepted.push(id);
            }
            verdicts.push((id, verdict));
        }

        let updated: HashSet<i32> = self
            .store
            .set_archived(&accepted, archived)
            .await?
            .into_iter()
            .collect();

        Ok(verdicts
            .into_iter()
            .map(|(id, error)| match error {
                Some(error) => ActionResult::failed(id, error),
                None if !updated.contains(&id) => {
                    ActionResult::failed(id, CoreError::ExperimentNotFound { id })
                }
                None => ActionResult::ok(id),
            })
            .collect())
    }

    /// Move the targeted experiments into another project.
    ///
    /// The destination must exist and be unarchived, or the whole request
    /// fails. The move itself is atomic: either every accepted experiment
    /// (with its runs and cached hyperparameters) lands in the destination,
    /// or none do.
    #[instrument(skip_all, fields(user_id = user.user_id, destination_project_id))]
    pub async fn move_experiments(
        &self,
        user: &UserContext,
        ids: &[i32],
        filter: Option<&BulkFilter>,
        search: Option<&str>,
        destination_project_id: i32,
    ) -> Result<Vec<ActionResult>> {
        match self
            .store
            .project_hierarchy_archived(destination_project_id)
            .await?
        {
            None => {
                return Err(CoreError::ProjectNotFound {
                    id: destination_project_id,
                })
            }
            Some(true) => {
                return Err(CoreError::DestinationArchived {
                    project_id: destination_project_id,
                })
            }
            Some(false) => {}
        }

        let target = build_target(ids, filter, search, None)?;
        let mut query = ExperimentQuery::new(target);
        let explicit = query.is_explicit();
        if !explicit {
            query.require_unarchived_hierarchy = true;
        }
        let query = self
            .authz
            .filter_query(
                user,
                query,
                &[Permission::ViewExperimentMetadata, Permission::DeleteExperiment],
            )
            .await?;
        let candidates = self.store.move_candidates(&query).await?;
        let by_id: HashMap<i32, bool> =
            candidates.iter().map(|c| (c.id, c.archived)).collect();

        let ordered: Vec<i32> = if explicit {
            ids.to_vec()
        } else {
            candidates.iter().map(|c| c.id).collect()
        };

        let mut accepted = Vec::new();
        let mut verdicts: Vec<(i32, Option<CoreError>)> = Vec::new();
        for id in ordered {
            let verdict = match by_id.get(&id) {
                None => Some(CoreError::ExperimentNotFound { id }),
                Some(true) => Some(CoreError::Archived { id }),
                Some(false) => None,
            };
            if verdict.is_none() {
                accepted.push(id);
            }
            verdicts.push((id, verdict));
        }

        let moved: HashSet<i32> = self
            .store
            .move_to_project(&accepted, destination_project_id)
            .await?
            .into_iter()
            .collect();

        Ok(verdicts
            .into_iter()
            .map(|(id, error)| match error {
                Some(error) => ActionResult::failed(id, error),
                None if !moved.contains(&id) => {
                    ActionResult::failed(id, CoreError::ExperimentNotFound { id })
                }
                None => ActionResult::ok(id),
            })
            .collect())
    }

    /// Set the log retention policy of the targeted experiments and all of
    /// their runs. Only terminal experiments qualify.
    #[instrument(skip_all, fields(user_id = user.user_id, days))]
    pub async fn set_log_retention(
        &self,
        user: &UserContext,
        ids: &[i32],
        filter: Option<&BulkFilter>,
        search: Option<&str>,
        days: i16,
    ) -> Result<Vec<ActionResult>> {
        let target = build_target(ids, filter, search, None)?;
        let query = ExperimentQuery::new(target);
        let explicit = query.is_explicit();
        let query = self
            .authz
            .filter_query(user, query, &[Permission::UpdateExperimentMetadata])
            .await?;
        let visible = self.store.experiment_ids(&query).await?;

        let visible_set: HashSet<i32> = visible.iter().copied().collect();
        let ordered: Vec<i32> = if explicit { ids.to_vec() } else { visible };

        let mut updated = Vec::new();
        let mut results = Vec::new();
        for id in ordered {
            if explicit && !visible_set.contains(&id) {
                results.push(ActionResult::failed(id, CoreError::ExperimentNotFound { id }));
                continue;
            }
            match self.store.experiment_state(id).await? {
                None => {
                    results.push(ActionResult::failed(id, CoreError::ExperimentNotFound { id }));
                }
                Some(state) if !TERMINAL_STATES.contains(&state) => {
                    results.push(ActionResult::failed(
                        id,
                        CoreError::NonTerminalState { id, state },
                    ));
                }
                Some(_) => match self.store.set_log_retention_config(id, days).await {
                    Ok(()) => {
                        updated.push(id);
                        results.push(ActionResult::ok(id));
                    }
                    Err(e) if e.is_request_fatal() => return Err(e),
                    Err(e) => results.push(ActionResult::failed(id, e)),
                },
            }
        }

        if !updated.is_empty() {
            self.store.set_runs_log_retention(&updated, days).await?;
        }
        Ok(results)
    }
}
