//! Database connection and pool management.
//!
//! This module initializes the SeaORM connection pool for the SQLite job
//! store with configurable parameters and retry logic for transient
//! connect failures.

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::AppConfig;

/// Errors that can occur during database initialization.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

const CONNECT_ATTEMPTS: u32 = 3;

/// Initializes a database connection pool with the given configuration.
///
/// Retries transient connect failures with exponential backoff before
/// giving up.
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut options = ConnectOptions::new(cfg.database_url.clone());
    options
        .max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .sqlx_logging(false);

    let mut last_err = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        match Database::connect(options.clone()).await {
            Ok(db) => {
                info!(attempt, "Database connection established");
                return Ok(db);
            }
            Err(err) => {
                warn!(attempt, error = %err, "Database connection failed");
                last_err = Some(err);
                if attempt < CONNECT_ATTEMPTS {
                    sleep(Duration::from_millis(200 * 2u64.pow(attempt - 1))).await;
                }
            }
        }
    }

    Err(DatabaseError::ConnectionFailed {
        source: last_err.expect("at least one connect attempt"),
    })
    .context("database connection retries exhausted")
}

/// Applies any pending migrations.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .context("failed to apply database migrations")?;
    Ok(())
}
