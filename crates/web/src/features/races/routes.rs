use axum::{
    Router, middleware,
    routing::{get, post},
};

use super::handlers::{get_race_rankings, score_race};
use crate::middleware::auth::{ApiKeys, require_auth};
use crate::state::AppState;

pub fn routes(api_keys: ApiKeys) -> Router<AppState> {
    let protected = Router::new()
        .route("/score", post(score_race))
        .route_layer(middleware::from_fn_with_state(api_keys, require_auth));

    Router::new()
        .route("/:id/rankings", get(get_race_rankings))
        .merge(protected)
}
