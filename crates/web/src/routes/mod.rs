use axum::{Json, Router, extract::State, routing::get};
use serde_json::{Value, json};

use crate::error::WebResult;
use crate::features::{competitions, races, rankings, records};
use crate::middleware::auth::ApiKeys;
use crate::state::AppState;

pub fn api_routes(api_keys: ApiKeys) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/records", records::routes::routes(api_keys.clone()))
        .nest("/races", races::routes::routes(api_keys.clone()))
        .nest("/rankings", rankings::routes::routes(api_keys))
        .nest("/competitions", competitions::routes::routes())
}

async fn health(State(state): State<AppState>) -> WebResult<Json<Value>> {
    sqlx::query("SELECT 1")
        .execute(state.db.pool())
        .await
        .map_err(storage::error::StorageError::from)?;

    Ok(Json(json!({ "status": "ok" })))
}
