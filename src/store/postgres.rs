// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL implementation of the experiment store.
//!
//! Candidate queries are compiled from [`ExperimentQuery`] into a single
//! SQL statement with `QueryBuilder`, so target selection, per-operation
//! state requirements, and the authorization scope all apply in one round
//! trip. Multi-row mutations that must be atomic (move, dependent purge)
//! run inside explicit transactions.

use async_trait::async_trait;
use sqlx::postgres::{PgRow, Postgres};
use sqlx::{PgPool, QueryBuilder, Row};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::filter::{BulkFilter, Conjunction, FieldClause, FilterGroup, FilterNode, FilterOp};
use crate::state::State;
use crate::store::{
    AccessScope, ArchiveCandidate, DeleteCandidate, ExperimentQuery, ExperimentRow,
    ExperimentStore, MoveCandidate, TargetSelector,
};

/// PostgreSQL-backed experiment store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_state(id: i32, raw: &str) -> Result<State> {
    State::from_str(raw).ok_or_else(|| CoreError::Database {
        operation: "decode state".to_string(),
        details: format!("experiment {} has unknown state '{}'", id, raw),
    })
}

fn row_to_experiment(row: &PgRow) -> Result<ExperimentRow> {
    let id: i32 = row.try_get("id")?;
    let raw_state: String = row.try_get("state")?;
    Ok(ExperimentRow {
        id,
        state: parse_state(id, &raw_state)?,
        archived: row.try_get("archived")?,
        project_id: row.try_get("project_id")?,
        owner_id: row.try_get("owner_id")?,
    })
}

fn states_as_strings(states: &[State]) -> Vec<String> {
    states.iter().map(|s| s.as_str().to_string()).collect()
}

fn wrong_type(clause: &FieldClause) -> CoreError {
    CoreError::MalformedFilter {
        details: format!(
            "value {} does not fit column '{}'",
            clause.value, clause.column_name
        ),
    }
}

/// Append one `column op value` comparison.
fn push_clause(qb: &mut QueryBuilder<'_, Postgres>, clause: &FieldClause) -> Result<()> {
    use serde_json::Value;

    let int_value = |clause: &FieldClause| -> Result<i64> {
        match &clause.value {
            Value::Number(n) => n.as_i64().ok_or_else(|| wrong_type(clause)),
            _ => Err(wrong_type(clause)),
        }
    };
    let str_value = |clause: &FieldClause| -> Result<String> {
        match &clause.value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(wrong_type(clause)),
        }
    };

    let column = match clause.column_name.as_str() {
        "id" => "e.id",
        "projectId" => "e.project_id",
        "ownerId" => "e.owner_id",
        "name" => "e.config->>'name'",
        "description" => "e.config->>'description'",
        "state" => "e.state",
        "archived" => "e.archived",
        "label" => "e.config->'labels'",
        // parse_search validated the column set already
        other => {
            return Err(CoreError::UnsupportedField {
                field: other.to_string(),
            })
        }
    };

    match clause.column_name.as_str() {
        "id" | "projectId" | "ownerId" => {
            let value = int_value(clause)?;
            let op = match clause.operator {
                FilterOp::Eq => " = ",
                FilterOp::NotEq => " != ",
                FilterOp::Lt => " < ",
                FilterOp::Gt => " > ",
                _ => return Err(wrong_type(clause)),
            };
            qb.push(column).push(op).push_bind(value);
        }
        "name" | "description" | "state" => {
            let value = str_value(clause)?;
            match clause.operator {
                FilterOp::Eq => {
                    qb.push(column).push(" = ").push_bind(value);
                }
                FilterOp::NotEq => {
                    qb.push(column).push(" != ").push_bind(value);
                }
                FilterOp::Contains => {
                    qb.push(column)
                        .push(" ILIKE '%' || ")
                        .push_bind(value)
                        .push(" || '%'");
                }
                FilterOp::NotContains => {
                    qb.push(column)
                        .push(" NOT ILIKE '%' || ")
                        .push_bind(value)
                        .push(" || '%'");
                }
                _ => return Err(wrong_type(clause)),
            }
        }
        "archived" => {
            let value = match &clause.value {
                Value::Bool(b) => *b,
                _ => return Err(wrong_type(clause)),
            };
            match clause.operator {
                FilterOp::Eq => {
                    qb.push(column).push(" = ").push_bind(value);
                }
                FilterOp::NotEq => {
                    qb.push(column).push(" != ").push_bind(value);
                }
                _ => return Err(wrong_type(clause)),
            }
        }
        "label" => {
            let value = str_value(clause)?;
            match clause.operator {
                FilterOp::Eq | FilterOp::Contains => {
                    qb.push(column).push(" ? ").push_bind(value);
                }
                FilterOp::NotContains => {
                    qb.push("NOT (").push(column).push(" ? ").push_bind(value).push(")");
                }
                _ => return Err(wrong_type(clause)),
            }
        }
        _ => unreachable!("column matched above"),
    }
    Ok(())
}

/// Append a parenthesized predicate group.
fn push_group(qb: &mut QueryBuilder<'_, Postgres>, group: &FilterGroup) -> Result<()> {
    if group.children.is_empty() {
        qb.push("TRUE");
        return Ok(());
    }
    let joiner = match group.conjunction {
        Conjunction::And => " AND ",
        Conjunction::Or => " OR ",
    };
    qb.push("(");
    for (i, child) in group.children.iter().enumerate() {
        if i > 0 {
            qb.push(joiner);
        }
        match child {
            FilterNode::Field(clause) => push_clause(qb, clause)?,
            FilterNode::Group(nested) => push_group(qb, nested)?,
        }
    }
    qb.push(")");
    Ok(())
}

/// Append structured-filter conditions, all ANDed.
fn push_bulk_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &BulkFilter) -> Result<()> {
    if !filter.excluded_ids.is_empty() {
        qb.push(" AND NOT (e.id = ANY(")
            .push_bind(filter.excluded_ids.clone())
            .push("))");
    }
    if let Some(ref description) = filter.description {
        qb.push(" AND e.config->>'description' ILIKE '%' || ")
            .push_bind(description.clone())
            .push(" || '%'");
    }
    if let Some(ref name) = filter.name {
        qb.push(" AND e.config->>'name' ILIKE '%' || ")
            .push_bind(name.clone())
            .push(" || '%'");
    }
    for label in &filter.labels {
        qb.push(" AND e.config->'labels' ? ").push_bind(label.clone());
    }
    if let Some(archived) = filter.archived {
        qb.push(" AND e.archived = ").push_bind(archived);
    }
    if let Some(ref states) = filter.states {
        qb.push(" AND e.state = ANY(")
            .push_bind(states_as_strings(states))
            .push(")");
    }
    if !filter.owner_ids.is_empty() {
        qb.push(" AND e.owner_id = ANY(")
            .push_bind(filter.owner_ids.clone())
            .push(")");
    }
    if let Some(project_id) = filter.project_id {
        qb.push(" AND e.project_id = ").push_bind(project_id);
    }
    Ok(())
}

/// Append all conditions of an [`ExperimentQuery`] after `WHERE TRUE`.
fn push_query(qb: &mut QueryBuilder<'_, Postgres>, query: &ExperimentQuery) -> Result<()> {
    match &query.target {
        TargetSelector::Ids(ids) => {
            qb.push(" AND e.id = ANY(").push_bind(ids.clone()).push(")");
        }
        TargetSelector::Filter(filter) => push_bulk_filter(qb, filter)?,
        TargetSelector::Search(root) => {
            if !root.show_archived {
                qb.push(" AND NOT e.archived");
            }
            qb.push(" AND ");
            push_group(qb, &root.filter_group)?;
        }
    }
    if let Some(ref states) = query.require_states {
        qb.push(" AND e.state = ANY(")
            .push_bind(states_as_strings(states))
            .push(")");
    }
    if query.require_unarchived {
        qb.push(" AND NOT e.archived");
    }
    if query.require_archived {
        qb.push(" AND e.archived");
    }
    if query.require_unarchived_hierarchy {
        qb.push(" AND NOT (e.archived OR p.archived OR w.archived)");
    }
    match &query.scope {
        AccessScope::Unrestricted => {}
        AccessScope::Projects(projects) => {
            qb.push(" AND e.project_id = ANY(")
                .push_bind(projects.clone())
                .push(")");
        }
        AccessScope::Nothing => {
            qb.push(" AND FALSE");
        }
    }
    Ok(())
}

const FROM_EXPERIMENTS: &str = r#"
FROM experiments e
JOIN projects p ON p.id = e.project_id
JOIN workspaces w ON w.id = p.workspace_id
WHERE TRUE"#;

#[async_trait]
impl ExperimentStore for PostgresStore {
    async fn experiment_ids(&self, query: &ExperimentQuery) -> Result<Vec<i32>> {
        let mut qb = QueryBuilder::new("SELECT e.id ");
        qb.push(FROM_EXPERIMENTS);
        push_query(&mut qb, query)?;
        qb.push(" ORDER BY e.id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        debug!(matched = rows.len(), "resolved experiment ids");
        rows.iter().map(|row| Ok(row.try_get("id")?)).collect()
    }

    async fn delete_candidates(&self, query: &ExperimentQuery) -> Result<Vec<DeleteCandidate>> {
        let mut qb = QueryBuilder::new(
            r#"SELECT e.id, e.state, COUNT(mv.id) AS model_versions
FROM experiments e
JOIN projects p ON p.id = e.project_id
JOIN workspaces w ON w.id = p.workspace_id
LEFT JOIN runs r ON r.experiment_id = e.id
LEFT JOIN checkpoints c ON c.run_id = r.id
LEFT JOIN model_versions mv ON mv.checkpoint_id = c.id
WHERE TRUE"#,
        );
        push_query(&mut qb, query)?;
        qb.push(" GROUP BY e.id, e.state ORDER BY e.id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let id: i32 = row.try_get("id")?;
                let raw_state: String = row.try_get("state")?;
                Ok(DeleteCandidate {
                    id,
                    state: parse_state(id, &raw_state)?,
                    model_versions: row.try_get("model_versions")?,
                })
            })
            .collect()
    }

    async fn archive_candidates(&self, query: &ExperimentQuery) -> Result<Vec<ArchiveCandidate>> {
        let mut qb = QueryBuilder::new("SELECT e.id, e.archived, e.state = ANY(");
        qb.push_bind(states_as_strings(&crate::state::TERMINAL_STATES));
        qb.push(") AS terminal ");
        qb.push(FROM_EXPERIMENTS);
        push_query(&mut qb, query)?;
        qb.push(" ORDER BY e.id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(ArchiveCandidate {
                    id: row.try_get("id")?,
                    archived: row.try_get("archived")?,
                    terminal: row.try_get("terminal")?,
                })
            })
            .collect()
    }

    async fn move_candidates(&self, query: &ExperimentQuery) -> Result<Vec<MoveCandidate>> {
        let mut qb =
            QueryBuilder::new("SELECT e.id, (e.archived OR p.archived OR w.archived) AS archived ");
        qb.push(FROM_EXPERIMENTS);
        push_query(&mut qb, query)?;
        qb.push(" ORDER BY e.id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(MoveCandidate {
                    id: row.try_get("id")?,
                    archived: row.try_get("archived")?,
                })
            })
            .collect()
    }

    async fn experiment_state(&self, id: i32) -> Result<Option<State>> {
        let row = sqlx::query(r#"SELECT state FROM experiments WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("state")?;
                Ok(Some(parse_state(id, &raw)?))
            }
            None => Ok(None),
        }
    }

    async fn update_experiment_state(&self, id: i32, state: State) -> Result<()> {
        let result = sqlx::query(r#"UPDATE experiments SET state = $2 WHERE id = $1"#)
            .bind(id)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::ExperimentNotFound { id });
        }
        Ok(())
    }

    async fn mark_deleting(&self, ids: &[i32]) -> Result<Vec<ExperimentRow>> {
        let rows = sqlx::query(
            r#"
            UPDATE experiments
            SET state = 'DELETING'
            WHERE id = ANY($1)
            RETURNING id, state, archived, project_id, owner_id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_experiment).collect()
    }

    async fn set_archived(&self, ids: &[i32], archived: bool) -> Result<Vec<i32>> {
        let rows = sqlx::query(
            r#"UPDATE experiments SET archived = $2 WHERE id = ANY($1) RETURNING id"#,
        )
        .bind(ids)
        .bind(archived)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|row| Ok(row.try_get("id")?)).collect()
    }

    async fn project_hierarchy_archived(&self, project_id: i32) -> Result<Option<bool>> {
        let row = sqlx::query(
            r#"
            SELECT (p.archived OR w.archived) AS archived
            FROM projects p
            JOIN workspaces w ON w.id = p.workspace_id
            WHERE p.id = $1
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("archived")?)),
            None => Ok(None),
        }
    }

    async fn move_to_project(
        &self,
        ids: &[i32],
        destination_project_id: i32,
    ) -> Result<Vec<i32>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"UPDATE project_hparams SET project_id = $2 WHERE experiment_id = ANY($1)"#,
        )
        .bind(ids)
        .bind(destination_project_id)
        .execute(&mut *tx)
        .await?;

        let rows = sqlx::query(
            r#"UPDATE experiments SET project_id = $2 WHERE id = ANY($1) RETURNING id"#,
        )
        .bind(ids)
        .bind(destination_project_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(r#"UPDATE runs SET project_id = $2 WHERE experiment_id = ANY($1)"#)
            .bind(ids)
            .bind(destination_project_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        rows.iter().map(|row| Ok(row.try_get("id")?)).collect()
    }

    async fn set_log_retention_config(&self, id: i32, days: i16) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE experiments
            SET config = jsonb_set(config, '{log_retention_days}', to_jsonb($2::smallint))
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(days)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::ExperimentNotFound { id });
        }
        Ok(())
    }

    async fn set_runs_log_retention(&self, ids: &[i32], days: i16) -> Result<()> {
        sqlx::query(
            r#"UPDATE runs SET log_retention_days = $2 WHERE experiment_id = ANY($1)"#,
        )
        .bind(ids)
        .bind(days)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deleting_experiments(&self, limit: i64) -> Result<Vec<ExperimentRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, state, archived, project_id, owner_id
            FROM experiments
            WHERE state = 'DELETING'
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_experiment).collect()
    }

    async fn purge_dependents(&self, id: i32) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(r#"DELETE FROM project_hparams WHERE experiment_id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        // Checkpoints and model versions go with their runs via FK cascade.
        sqlx::query(r#"DELETE FROM runs WHERE experiment_id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_experiment_row(&self, id: i32) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(r#"UPDATE experiments SET state = 'DELETED' WHERE id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(r#"DELETE FROM experiments WHERE id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
