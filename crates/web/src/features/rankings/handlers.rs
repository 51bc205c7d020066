use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use storage::{dto::ranking::FinishStatusOverrideRequest, models::Ranking};

use crate::error::WebError;
use crate::state::AppState;

use super::services;

#[utoipa::path(
    put,
    path = "/api/rankings/{id}/finish-status",
    params(
        ("id" = i32, Path, description = "Ranking ID")
    ),
    request_body = FinishStatusOverrideRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Finish status updated", body = Ranking),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Ranking not found")
    ),
    tag = "rankings"
)]
pub async fn override_finish_status(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(req): Json<FinishStatusOverrideRequest>,
) -> Result<Response, WebError> {
    let ranking = services::override_finish_status(&state.engine, id, &req).await?;

    Ok(Json(ranking).into_response())
}
