use anyhow::{Context, Result};
use storage::EngineConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub api_keys: String,
    pub activity_threshold_amps: f64,
    pub guard_gap_ms: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = EngineConfig::default();

        Ok(Self {
            host: std::env::var("HOST").context("Cannot load HOST env variable")?,
            port: std::env::var("PORT")
                .context("Cannot load PORT env variable")?
                .parse()
                .context("PORT must be a number")?,
            database_url: std::env::var("DATABASE_URL")
                .context("Cannot load DATABASE_URL env variable")?,
            api_keys: std::env::var("API_KEYS").unwrap_or_default(),
            activity_threshold_amps: optional_var("ACTIVITY_THRESHOLD_AMPS")?
                .unwrap_or(defaults.activity_threshold_amps),
            guard_gap_ms: optional_var("MERGE_GUARD_GAP_MS")?.unwrap_or(defaults.guard_gap_ms),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            activity_threshold_amps: self.activity_threshold_amps,
            guard_gap_ms: self.guard_gap_ms,
        }
    }
}

fn optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} has an invalid value: {value}")),
        Err(_) => Ok(None),
    }
}
