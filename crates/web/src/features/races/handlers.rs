use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use storage::dto::race::{RaceRankingsResponse, ScoreRaceRequest, ScoreRaceResponse};

use crate::error::WebError;
use crate::state::AppState;

use super::services;

#[utoipa::path(
    post,
    path = "/api/races/score",
    request_body = ScoreRaceRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Race scored and marked completed", body = ScoreRaceResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Race not found"),
        (status = 409, description = "A team has several unmerged records in the race"),
        (status = 500, description = "Rankings could not be persisted; the race stays open and the pass can be retried")
    ),
    tag = "races"
)]
pub async fn score_race(
    State(state): State<AppState>,
    Json(req): Json<ScoreRaceRequest>,
) -> Result<Response, WebError> {
    let response = services::score_race(&state.engine, &req).await?;

    Ok(Json(response).into_response())
}

#[utoipa::path(
    get,
    path = "/api/races/{id}/rankings",
    params(
        ("id" = i32, Path, description = "Race ID")
    ),
    responses(
        (status = 200, description = "Rankings grouped by category", body = RaceRankingsResponse),
        (status = 404, description = "Race not found")
    ),
    tag = "races"
)]
pub async fn get_race_rankings(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response, WebError> {
    let response = services::race_rankings(&state.engine, id).await?;

    Ok(Json(response).into_response())
}
