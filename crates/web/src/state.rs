use std::sync::Arc;

use storage::{Database, EngineConfig, repository::PgStore, services::TelemetryEngine};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub engine: TelemetryEngine,
}

impl AppState {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        let store = Arc::new(PgStore::new(db.pool().clone()));
        Self {
            engine: TelemetryEngine::new(store, config),
            db,
        }
    }
}
