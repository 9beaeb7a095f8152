// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bulk-action target filters and the search-expression predicate AST.
//!
//! A bulk request targets experiments one of three ways: an explicit ID
//! list, a structured [`BulkFilter`], or a free-text search expression. The
//! expression is a JSON document parsed here into a tagged predicate AST
//! ([`FilterGroup`]) that the store compiles to SQL once; the coordinator
//! never sees query syntax.
//!
//! Malformed expressions and unknown columns are request-fatal: the whole
//! bulk call fails rather than producing a partial result list.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::state::State;

/// Structured filter for bulk experiment actions.
///
/// All populated fields are ANDed together. `states: None` means the
/// per-operation default state set applies (e.g. activate defaults to
/// `PAUSED` only); an explicit empty list matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkFilter {
    /// IDs to exclude from the match, regardless of other fields.
    #[serde(default)]
    pub excluded_ids: Vec<i32>,
    /// Substring match against the config description.
    #[serde(default)]
    pub description: Option<String>,
    /// Substring match against the config name.
    #[serde(default)]
    pub name: Option<String>,
    /// Labels that must all be present on the experiment.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Match only archived (true) or unarchived (false) experiments.
    #[serde(default)]
    pub archived: Option<bool>,
    /// Match experiments in any of these states.
    #[serde(default)]
    pub states: Option<Vec<State>>,
    /// Match experiments owned by any of these users.
    #[serde(default)]
    pub owner_ids: Vec<i32>,
    /// Match experiments in this project.
    #[serde(default)]
    pub project_id: Option<i32>,
}

/// Columns the search-expression language may reference.
pub const SUPPORTED_COLUMNS: [&str; 8] = [
    "id",
    "name",
    "description",
    "state",
    "archived",
    "projectId",
    "ownerId",
    "label",
];

/// How the children of a [`FilterGroup`] combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conjunction {
    /// All children must match.
    And,
    /// At least one child must match.
    Or,
}

/// Comparison operator in a field clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// Equality.
    #[serde(rename = "=")]
    Eq,
    /// Inequality.
    #[serde(rename = "!=")]
    NotEq,
    /// Case-insensitive substring match.
    #[serde(rename = "contains")]
    Contains,
    /// Negated case-insensitive substring match.
    #[serde(rename = "notContains")]
    NotContains,
    /// Less than.
    #[serde(rename = "<")]
    Lt,
    /// Greater than.
    #[serde(rename = ">")]
    Gt,
}

/// A single `column op value` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldClause {
    /// Column the clause applies to; must be in [`SUPPORTED_COLUMNS`].
    pub column_name: String,
    /// Comparison operator.
    pub operator: FilterOp,
    /// Comparison value; interpretation depends on the column.
    pub value: serde_json::Value,
}

/// A node in the predicate AST: either a leaf clause or a nested group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FilterNode {
    /// Leaf comparison.
    Field(FieldClause),
    /// Nested group with its own conjunction.
    Group(FilterGroup),
}

/// A conjunction/disjunction over filter nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterGroup {
    /// How the children combine.
    pub conjunction: Conjunction,
    /// Child nodes; an empty group matches everything.
    pub children: Vec<FilterNode>,
}

/// Root of a parsed search expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRoot {
    /// The predicate tree.
    pub filter_group: FilterGroup,
    /// Whether archived experiments are included in the match.
    #[serde(default)]
    pub show_archived: bool,
}

impl FilterGroup {
    /// Reject clauses referencing columns the store cannot compile.
    fn validate(&self) -> Result<()> {
        for child in &self.children {
            match child {
                FilterNode::Field(clause) => {
                    if !SUPPORTED_COLUMNS.contains(&clause.column_name.as_str()) {
                        return Err(CoreError::UnsupportedField {
                            field: clause.column_name.clone(),
                        });
                    }
                }
                FilterNode::Group(group) => group.validate()?,
            }
        }
        Ok(())
    }
}

/// Parse a search expression into its predicate AST.
///
/// A malformed document or an unsupported column is a request-fatal error;
/// bulk operations must not fall back to partial matching.
pub fn parse_search(expr: &str) -> Result<FilterRoot> {
    let root: FilterRoot =
        serde_json::from_str(expr).map_err(|e| CoreError::MalformedFilter {
            details: e.to_string(),
        })?;
    root.filter_group.validate()?;
    Ok(root)
}
