use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use storage::dto::ranking::LeaderboardResponse;

use crate::error::WebError;
use crate::state::AppState;

use super::services;

#[utoipa::path(
    get,
    path = "/api/competitions/{id}/leaderboard",
    params(
        ("id" = i32, Path, description = "Competition ID")
    ),
    responses(
        (status = 200, description = "Leaderboard grouped by category", body = LeaderboardResponse),
        (status = 404, description = "Competition not found")
    ),
    tag = "competitions"
)]
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response, WebError> {
    let leaderboard = services::leaderboard(&state.engine, id).await?;

    Ok(Json(leaderboard).into_response())
}
