//! In-memory mock store for unit tests.
//!
//! Evaluates the same candidate queries the Postgres backend compiles to
//! SQL, over a map of plain structs, so coordinator and actor tests run
//! without a database.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::filter::{
    BulkFilter, Conjunction, FieldClause, FilterGroup, FilterNode, FilterOp, FilterRoot,
};
use crate::state::{State, TERMINAL_STATES};
use crate::store::{
    AccessScope, ArchiveCandidate, DeleteCandidate, ExperimentQuery, ExperimentRow,
    ExperimentStore, MoveCandidate, TargetSelector,
};

/// One experiment in the mock store.
#[derive(Debug, Clone)]
pub struct MockExperiment {
    pub state: State,
    pub archived: bool,
    pub project_id: i32,
    pub owner_id: i32,
    pub name: String,
    pub description: String,
    pub labels: Vec<String>,
    pub model_versions: i64,
    pub retention_days: Option<i16>,
}

impl MockExperiment {
    fn basic(state: State, archived: bool, project_id: i32, owner_id: i32) -> Self {
        Self {
            state,
            archived,
            project_id,
            owner_id,
            name: String::new(),
            description: String::new(),
            labels: Vec::new(),
            model_versions: 0,
            retention_days: None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    experiments: BTreeMap<i32, MockExperiment>,
    /// project ID -> project-or-workspace archived
    projects: BTreeMap<i32, bool>,
    runs_retention: BTreeMap<i32, i16>,
    purged: Vec<i32>,
    deleted_rows: Vec<i32>,
    fail_next_update: bool,
    fail_move: bool,
    fail_purge: bool,
    fail_row_delete: bool,
}

/// Mock [`ExperimentStore`] backed by a mutex-protected map.
#[derive(Debug, Default)]
pub struct MockExperimentStore {
    inner: Mutex<Inner>,
}

impl MockExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_experiment(
        &self,
        id: i32,
        state: State,
        archived: bool,
        project_id: i32,
        owner_id: i32,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.projects.entry(project_id).or_insert(false);
        inner
            .experiments
            .insert(id, MockExperiment::basic(state, archived, project_id, owner_id));
    }

    pub fn add_experiment_full(&self, id: i32, experiment: MockExperiment) {
        let mut inner = self.inner.lock().unwrap();
        inner.projects.entry(experiment.project_id).or_insert(false);
        inner.experiments.insert(id, experiment);
    }

    pub fn add_project(&self, id: i32, archived: bool) {
        self.inner.lock().unwrap().projects.insert(id, archived);
    }

    pub fn state_of(&self, id: i32) -> Option<State> {
        self.inner
            .lock()
            .unwrap()
            .experiments
            .get(&id)
            .map(|e| e.state)
    }

    pub fn experiment(&self, id: i32) -> Option<MockExperiment> {
        self.inner.lock().unwrap().experiments.get(&id).cloned()
    }

    pub fn runs_retention_of(&self, id: i32) -> Option<i16> {
        self.inner.lock().unwrap().runs_retention.get(&id).copied()
    }

    pub fn purged(&self) -> Vec<i32> {
        self.inner.lock().unwrap().purged.clone()
    }

    pub fn deleted_rows(&self) -> Vec<i32> {
        self.inner.lock().unwrap().deleted_rows.clone()
    }

    /// Fail the next `update_experiment_state` call with a database error.
    pub fn fail_next_update(&self) {
        self.inner.lock().unwrap().fail_next_update = true;
    }

    /// Make `move_to_project` fail without applying anything.
    pub fn fail_move(&self) {
        self.inner.lock().unwrap().fail_move = true;
    }

    /// Make `purge_dependents` fail.
    pub fn fail_purge(&self) {
        self.inner.lock().unwrap().fail_purge = true;
    }

    /// Make `delete_experiment_row` fail without touching the row.
    pub fn fail_row_delete(&self) {
        self.inner.lock().unwrap().fail_row_delete = true;
    }

    fn db_error(what: &str) -> CoreError {
        CoreError::Database {
            operation: what.to_string(),
            details: "injected failure".to_string(),
        }
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn matches_filter(id: i32, exp: &MockExperiment, filter: &BulkFilter) -> bool {
    if filter.excluded_ids.contains(&id) {
        return false;
    }
    if let Some(ref description) = filter.description {
        if !contains_ci(&exp.description, description) {
            return false;
        }
    }
    if let Some(ref name) = filter.name {
        if !contains_ci(&exp.name, name) {
            return false;
        }
    }
    if !filter.labels.iter().all(|l| exp.labels.contains(l)) {
        return false;
    }
    if let Some(archived) = filter.archived {
        if exp.archived != archived {
            return false;
        }
    }
    if let Some(ref states) = filter.states {
        if !states.contains(&exp.state) {
            return false;
        }
    }
    if !filter.owner_ids.is_empty() && !filter.owner_ids.contains(&exp.owner_id) {
        return false;
    }
    if let Some(project_id) = filter.project_id {
        if exp.project_id != project_id {
            return false;
        }
    }
    true
}

fn matches_clause(id: i32, exp: &MockExperiment, clause: &FieldClause) -> bool {
    use serde_json::Value;

    let int_cmp = |actual: i64| -> bool {
        match (&clause.value, clause.operator) {
            (Value::Number(n), FilterOp::Eq) => n.as_i64() == Some(actual),
            (Value::Number(n), FilterOp::NotEq) => n.as_i64() != Some(actual),
            (Value::Number(n), FilterOp::Lt) => n.as_i64().is_some_and(|v| actual < v),
            (Value::Number(n), FilterOp::Gt) => n.as_i64().is_some_and(|v| actual > v),
            _ => false,
        }
    };
    let str_cmp = |actual: &str| -> bool {
        match (&clause.value, clause.operator) {
            (Value::String(s), FilterOp::Eq) => actual == s,
            (Value::String(s), FilterOp::NotEq) => actual != s,
            (Value::String(s), FilterOp::Contains) => contains_ci(actual, s),
            (Value::String(s), FilterOp::NotContains) => !contains_ci(actual, s),
            _ => false,
        }
    };

    match clause.column_name.as_str() {
        "id" => int_cmp(id as i64),
        "projectId" => int_cmp(exp.project_id as i64),
        "ownerId" => int_cmp(exp.owner_id as i64),
        "name" => str_cmp(&exp.name),
        "description" => str_cmp(&exp.description),
        "state" => str_cmp(exp.state.as_str()),
        "archived" => match (&clause.value, clause.operator) {
            (serde_json::Value::Bool(b), FilterOp::Eq) => exp.archived == *b,
            (serde_json::Value::Bool(b), FilterOp::NotEq) => exp.archived != *b,
            _ => false,
        },
        "label" => match (&clause.value, clause.operator) {
            (serde_json::Value::String(s), FilterOp::Eq)
            | (serde_json::Value::String(s), FilterOp::Contains) => exp.labels.contains(s),
            (serde_json::Value::String(s), FilterOp::NotContains) => !exp.labels.contains(s),
            _ => false,
        },
        _ => false,
    }
}

fn matches_group(id: i32, exp: &MockExperiment, group: &FilterGroup) -> bool {
    let mut eval = group.children.iter().map(|child| match child {
        FilterNode::Field(clause) => matches_clause(id, exp, clause),
        FilterNode::Group(nested) => matches_group(id, exp, nested),
    });
    match group.conjunction {
        Conjunction::And => eval.all(|m| m),
        Conjunction::Or => group.children.is_empty() || eval.any(|m| m),
    }
}

fn matches_search(id: i32, exp: &MockExperiment, root: &FilterRoot) -> bool {
    if !root.show_archived && exp.archived {
        return false;
    }
    matches_group(id, exp, &root.filter_group)
}

impl Inner {
    fn project_archived(&self, project_id: i32) -> bool {
        self.projects.get(&project_id).copied().unwrap_or(false)
    }

    fn matches(&self, id: i32, exp: &MockExperiment, query: &ExperimentQuery) -> bool {
        match &query.scope {
            AccessScope::Unrestricted => {}
            AccessScope::Projects(projects) => {
                if !projects.contains(&exp.project_id) {
                    return false;
                }
            }
            AccessScope::Nothing => return false,
        }
        if query.require_unarchived && exp.archived {
            return false;
        }
        if query.require_archived && !exp.archived {
            return false;
        }
        if query.require_unarchived_hierarchy
            && (exp.archived || self.project_archived(exp.project_id))
        {
            return false;
        }
        if let Some(ref states) = query.require_states {
            if !states.contains(&exp.state) {
                return false;
            }
        }
        match &query.target {
            TargetSelector::Ids(ids) => ids.contains(&id),
            TargetSelector::Filter(filter) => matches_filter(id, exp, filter),
            TargetSelector::Search(root) => matches_search(id, exp, root),
        }
    }

    fn matching_ids(&self, query: &ExperimentQuery) -> Vec<i32> {
        self.experiments
            .iter()
            .filter(|(id, exp)| self.matches(**id, exp, query))
            .map(|(id, _)| *id)
            .collect()
    }
}

#[async_trait]
impl ExperimentStore for MockExperimentStore {
    async fn experiment_ids(&self, query: &ExperimentQuery) -> Result<Vec<i32>> {
        Ok(self.inner.lock().unwrap().matching_ids(query))
    }

    async fn delete_candidates(&self, query: &ExperimentQuery) -> Result<Vec<DeleteCandidate>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .matching_ids(query)
            .into_iter()
            .map(|id| {
                let exp = &inner.experiments[&id];
                DeleteCandidate {
                    id,
                    state: exp.state,
                    model_versions: exp.model_versions,
                }
            })
            .collect())
    }

    async fn archive_candidates(&self, query: &ExperimentQuery) -> Result<Vec<ArchiveCandidate>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .matching_ids(query)
            .into_iter()
            .map(|id| {
                let exp = &inner.experiments[&id];
                ArchiveCandidate {
                    id,
                    archived: exp.archived,
                    terminal: TERMINAL_STATES.contains(&exp.state),
                }
            })
            .collect())
    }

    async fn move_candidates(&self, query: &ExperimentQuery) -> Result<Vec<MoveCandidate>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .matching_ids(query)
            .into_iter()
            .map(|id| {
                let exp = &inner.experiments[&id];
                MoveCandidate {
                    id,
                    archived: exp.archived || inner.project_archived(exp.project_id),
                }
            })
            .collect())
    }

    async fn experiment_state(&self, id: i32) -> Result<Option<State>> {
        Ok(self.state_of(id))
    }

    async fn update_experiment_state(&self, id: i32, state: State) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_next_update {
            inner.fail_next_update = false;
            return Err(Self::db_error("update_experiment_state"));
        }
        match inner.experiments.get_mut(&id) {
            Some(exp) => {
                exp.state = state;
                Ok(())
            }
            None => Err(CoreError::ExperimentNotFound { id }),
        }
    }

    async fn mark_deleting(&self, ids: &[i32]) -> Result<Vec<ExperimentRow>> {
        let mut inner = self.inner.lock().unwrap();
        let mut accepted = Vec::new();
        for id in ids {
            if let Some(exp) = inner.experiments.get_mut(id) {
                exp.state = State::Deleting;
                accepted.push(ExperimentRow {
                    id: *id,
                    state: exp.state,
                    archived: exp.archived,
                    project_id: exp.project_id,
                    owner_id: exp.owner_id,
                });
            }
        }
        Ok(accepted)
    }

    async fn set_archived(&self, ids: &[i32], archived: bool) -> Result<Vec<i32>> {
        let mut inner = self.inner.lock().unwrap();
        let mut updated = Vec::new();
        for id in ids {
            if let Some(exp) = inner.experiments.get_mut(id) {
                exp.archived = archived;
                updated.push(*id);
            }
        }
        Ok(updated)
    }

    async fn project_hierarchy_archived(&self, project_id: i32) -> Result<Option<bool>> {
        Ok(self.inner.lock().unwrap().projects.get(&project_id).copied())
    }

    async fn move_to_project(
        &self,
        ids: &[i32],
        destination_project_id: i32,
    ) -> Result<Vec<i32>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_move {
            // Transactional: the failure leaves every row untouched.
            return Err(Self::db_error("move_to_project"));
        }
        let mut moved = Vec::new();
        for id in ids {
            if let Some(exp) = inner.experiments.get_mut(id) {
                exp.project_id = destination_project_id;
                moved.push(*id);
            }
        }
        Ok(moved)
    }

    async fn set_log_retention_config(&self, id: i32, days: i16) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.experiments.get_mut(&id) {
            Some(exp) => {
                exp.retention_days = Some(days);
                Ok(())
            }
            None => Err(CoreError::ExperimentNotFound { id }),
        }
    }

    async fn set_runs_log_retention(&self, ids: &[i32], days: i16) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for id in ids {
            inner.runs_retention.insert(*id, days);
        }
        Ok(())
    }

    async fn deleting_experiments(&self, limit: i64) -> Result<Vec<ExperimentRow>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .experiments
            .iter()
            .filter(|(_, exp)| exp.state == State::Deleting)
            .take(limit as usize)
            .map(|(id, exp)| ExperimentRow {
                id: *id,
                state: exp.state,
                archived: exp.archived,
                project_id: exp.project_id,
                owner_id: exp.owner_id,
            })
            .collect())
    }

    async fn purge_dependents(&self, id: i32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_purge {
            return Err(Self::db_error("purge_dependents"));
        }
        inner.purged.push(id);
        inner.runs_retention.remove(&id);
        Ok(())
    }

    async fn delete_experiment_row(&self, id: i32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_row_delete {
            // Transactional: on failure the row keeps its previous state.
            return Err(Self::db_error("delete_experiment_row"));
        }
        inner.experiments.remove(&id);
        inner.deleted_rows.push(id);
        Ok(())
    }
}
