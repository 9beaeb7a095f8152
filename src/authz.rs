// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authorization gate for bulk experiment actions.
//!
//! The gate narrows a candidate query to the rows the requesting user may
//! act on before it executes. Rows the gate removes never appear in bulk
//! results; for explicit-ID requests they surface as not-found, so a caller
//! cannot distinguish "does not exist" from "exists but forbidden".

use async_trait::async_trait;

use crate::error::Result;
use crate::store::ExperimentQuery;

/// Permission an operation requires on its target experiments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Change an experiment's lifecycle (activate, pause, cancel, kill).
    UpdateExperiment,
    /// Change experiment metadata (archive flags, retention).
    UpdateExperimentMetadata,
    /// Delete an experiment.
    DeleteExperiment,
    /// See that an experiment exists and read its metadata.
    ViewExperimentMetadata,
}

/// Identity of the caller issuing a bulk request.
#[derive(Debug, Clone)]
pub struct UserContext {
    /// User ID from the platform's user table.
    pub user_id: i32,
}

/// Scopes candidate queries down to what a user may act on.
///
/// Implementations mutate the query's [`AccessScope`](crate::store::AccessScope);
/// they must not execute it. A gate infrastructure failure is request-fatal.
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    /// Narrow `query` to rows `user` holds all of `required` on.
    async fn filter_query(
        &self,
        user: &UserContext,
        query: ExperimentQuery,
        required: &[Permission],
    ) -> Result<ExperimentQuery>;
}

/// Gate that authorizes everything. Deployments without access control use
/// this; it leaves the query untouched.
#[derive(Debug, Default)]
pub struct AllowAllGate;

#[async_trait]
impl AuthorizationGate for AllowAllGate {
    async fn filter_query(
        &self,
        _user: &UserContext,
        query: ExperimentQuery,
        _required: &[Permission],
    ) -> Result<ExperimentQuery> {
        Ok(query)
    }
}
