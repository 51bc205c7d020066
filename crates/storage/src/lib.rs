pub mod dto;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::Result;
use crate::services::active_window::ACTIVITY_CURRENT_THRESHOLD;
use crate::services::merger::GUARD_GAP_MS;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Tunables of the reconciliation and scoring engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Current (A) a sample must exceed to count as active.
    pub activity_threshold_amps: f64,
    /// Minimum gap between consecutive fragments on a merged timeline.
    pub guard_gap_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            activity_threshold_amps: ACTIVITY_CURRENT_THRESHOLD,
            guard_gap_ms: GUARD_GAP_MS,
        }
    }
}
