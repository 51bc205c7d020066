use storage::{
    dto::ranking::FinishStatusOverrideRequest, error::Result, models::Ranking,
    services::TelemetryEngine,
};

/// Force or clear the finish status of a ranking
pub async fn override_finish_status(
    engine: &TelemetryEngine,
    ranking_id: i32,
    req: &FinishStatusOverrideRequest,
) -> Result<Ranking> {
    engine.override_finish_status(ranking_id, req).await
}
