use axum::{Router, middleware, routing::put};

use super::handlers::override_finish_status;
use crate::middleware::auth::{ApiKeys, require_auth};
use crate::state::AppState;

pub fn routes(api_keys: ApiKeys) -> Router<AppState> {
    Router::new()
        .route("/:id/finish-status", put(override_finish_status))
        .route_layer(middleware::from_fn_with_state(api_keys, require_auth))
}
