// Copyright (C) 2026 Tracelab Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Tracelab Core configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Maximum database pool connections.
    pub max_db_connections: u32,
    /// How often the deletion reaper polls for accepted deletions.
    pub reaper_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `TRACELAB_DATABASE_URL`: PostgreSQL connection string
    ///
    /// Optional (with defaults):
    /// - `TRACELAB_MAX_DB_CONNECTIONS`: pool size (default: 10)
    /// - `TRACELAB_REAPER_INTERVAL_SECS`: reaper poll interval (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("TRACELAB_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("TRACELAB_DATABASE_URL"))?;

        let max_db_connections: u32 = std::env::var("TRACELAB_MAX_DB_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("TRACELAB_MAX_DB_CONNECTIONS", "must be a positive integer")
            })?;

        let reaper_interval_secs: u64 = std::env::var("TRACELAB_REAPER_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("TRACELAB_REAPER_INTERVAL_SECS", "must be a positive integer")
            })?;

        Ok(Self {
            database_url,
            max_db_connections,
            reaper_interval: Duration::from_secs(reaper_interval_secs),
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
