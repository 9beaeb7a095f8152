// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tracelab Core - Experiment Lifecycle Engine
//!
//! This crate provides the experiment lifecycle core for the tracelab
//! control plane. It owns the experiment state machine, keeps one live
//! actor per running experiment, coordinates bulk actions across
//! thousands of experiments at a time, and tears deleted experiments
//! down in the background. All durable state lives in PostgreSQL.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       API Layer (gRPC/REST)                     │
//! │                   (ids / filter / search requests)              │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      BulkActionState                            │
//! │     resolve targets -> authorize -> precondition -> mutate      │
//! └─────────────────────────────────────────────────────────────────┘
//!        │                        │                        │
//!        ▼                        ▼                        ▼
//! ┌──────────────┐    ┌─────────────────────┐    ┌────────────────┐
//! │ Authorization│    │ ExperimentRegistry  │    │ ExperimentStore│
//! │     Gate     │    │ (one actor per live │    │  (PostgreSQL)  │
//! └──────────────┘    │     experiment)     │    └────────────────┘
//!                     └─────────────────────┘             ▲
//!                                                         │
//!                     ┌─────────────────────┐             │
//!                     │   Deletion Reaper   │─────────────┘
//!                     │  (background sweep) │──► ResourceManager
//!                     └─────────────────────┘
//! ```
//!
//! # Experiment State Machine
//!
//! ```text
//!        ┌────────┐  pause   ┌────────┐
//!        │ ACTIVE │◄────────►│ PAUSED │
//!        └───┬────┘ activate └───┬────┘
//!            │ cancel/kill/done  │ cancel/kill/done
//!            ▼                   ▼
//!      ┌───────────────────────────────┐
//!      │          STOPPING_*           │
//!      │ CANCELED KILLED COMPLETED ERROR│
//!      └───────────────┬───────────────┘
//!                      │ finalize
//!                      ▼
//!      ┌───────────────────────────────┐   delete   ┌──────────┐
//!      │  CANCELED COMPLETED ERROR     │───────────►│ DELETING │
//!      └───────────────────────────────┘            └────┬─────┘
//!                                          ┌─────────────┼─────────────┐
//!                                          ▼             ▼             │
//!                                    ┌─────────┐  ┌───────────────┐    │
//!                                    │ DELETED │  │ DELETE_FAILED │────┘
//!                                    └─────────┘  └───────────────┘ retry
//! ```
//!
//! A killed experiment is recorded as `CANCELED`; `DELETED` rows disappear
//! immediately after the state is written.
//!
//! # Bulk Actions
//!
//! | Operation | Targets | Per-entity preconditions |
//! |-----------|---------|--------------------------|
//! | Activate | ids/filter/search | non-terminal, transition legal |
//! | Pause | ids/filter/search | non-terminal, transition legal |
//! | Cancel | ids/filter/search | none (terminal is success) |
//! | Kill | ids/filter/search | none (terminal is success) |
//! | Delete | ids/filter/search | deletable state, no model versions |
//! | Archive | ids/filter/search | terminal, not yet archived |
//! | Unarchive | ids/filter/search | archived |
//! | Move | ids/filter/search | target hierarchy unarchived |
//! | Set log retention | ids/filter/search | terminal |
//!
//! Results are partial: each targeted experiment reports success or its own
//! failure, and only malformed requests or infrastructure errors abort the
//! whole call.

#![deny(missing_docs)]

/// Authorization gate trait and permissive default implementation.
pub mod authz;

/// Bulk action coordination across experiments.
pub mod bulk_action;

/// Configuration loading from environment variables.
pub mod config;

/// Error types shared across the crate.
pub mod error;

/// Live experiment actors and their lifecycle loop.
pub mod experiment;

/// Bulk-action filters and the search-expression AST.
pub mod filter;

/// Embedded database migrations.
pub mod migrations;

/// Registry of live experiment handles.
pub mod registry;

/// Background deletion reaper.
pub mod reaper;

/// Resource-manager adapter contract.
pub mod resource_manager;

/// Experiment lifecycle states and the transition table.
pub mod state;

/// Entity-store interfaces and the PostgreSQL backend.
pub mod store;
