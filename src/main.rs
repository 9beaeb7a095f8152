// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tracelab Core - Experiment Lifecycle Engine
//!
//! This binary wires the lifecycle core together:
//! - PostgreSQL store and embedded migrations
//! - registry of live experiment actors, rebuilt from non-terminal rows
//! - background deletion reaper
//!
//! The API surface (gRPC/REST) lives in the gateway service; it embeds
//! [`BulkActionState`](tracelab_core::bulk_action::BulkActionState) from
//! this crate.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::Row;
use tracing::{error, info, warn};

use tracelab_core::config::Config;
use tracelab_core::experiment::spawn_experiment;
use tracelab_core::migrations;
use tracelab_core::reaper::spawn_reaper;
use tracelab_core::registry::ExperimentRegistry;
use tracelab_core::resource_manager::NoopResourceManager;
use tracelab_core::state::{State, NON_TERMINAL_STATES};
use tracelab_core::store::{ExperimentStore, PostgresStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tracelab_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting Tracelab Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        max_db_connections = config.max_db_connections,
        reaper_interval_secs = config.reaper_interval.as_secs(),
        "Configuration loaded"
    );

    // Connect to database
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(&config.database_url)
        .await?;

    info!("Database connection established");

    // Verify connection
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
    info!(result = row.0, "Database health check passed");

    info!("Running database migrations...");
    migrations::run_postgres(&pool).await?;
    info!("Migrations completed");

    // Build the lifecycle core
    let store: Arc<dyn ExperimentStore> = Arc::new(PostgresStore::new(pool.clone()));
    let registry = Arc::new(ExperimentRegistry::new());
    let resource_manager = Arc::new(NoopResourceManager);

    // Re-register every non-terminal experiment left over from the last run
    let rows = sqlx::query("SELECT id, state FROM experiments WHERE state = ANY($1)")
        .bind(
            NON_TERMINAL_STATES
                .iter()
                .map(|s| s.as_str().to_string())
                .collect::<Vec<_>>(),
        )
        .fetch_all(&pool)
        .await?;
    for row in &rows {
        let id: i32 = row.try_get("id")?;
        let raw_state: String = row.try_get("state")?;
        match State::from_str(&raw_state) {
            Some(state) => {
                if let Err(e) = spawn_experiment(id, state, registry.clone(), store.clone()) {
                    warn!(experiment_id = id, error = %e, "could not restore experiment");
                }
            }
            None => warn!(experiment_id = id, state = raw_state, "unknown state in database"),
        }
    }
    info!(restored = registry.len(), "Live experiments restored");

    // Start the deletion reaper
    let reaper = spawn_reaper(store, resource_manager, config.reaper_interval);

    info!("Tracelab Core initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    reaper.shutdown().await;
    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
