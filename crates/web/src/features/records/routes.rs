use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use super::handlers::{
    assign_record, batch_update, get_record, list_records, list_samples, merge_records,
    preview_merge, recompute_aggregates, set_disabled, upload_fragment,
};
use crate::middleware::auth::{ApiKeys, require_auth};
use crate::state::AppState;

pub fn routes(api_keys: ApiKeys) -> Router<AppState> {
    let protected = Router::new()
        .route("/", post(upload_fragment))
        .route("/merge", post(merge_records))
        .route("/aggregates", post(recompute_aggregates))
        .route("/batch-update", post(batch_update))
        .route("/:id/disabled", put(set_disabled))
        .route("/:id/assignment", put(assign_record))
        .route_layer(middleware::from_fn_with_state(api_keys, require_auth));

    Router::new()
        .route("/", get(list_records))
        .route("/merge/preview", post(preview_merge))
        .route("/:id", get(get_record))
        .route("/:id/samples", get(list_samples))
        .merge(protected)
}
