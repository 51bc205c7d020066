use storage::{
    dto::race::{RaceRankingsResponse, ScoreRaceRequest, ScoreRaceResponse},
    error::Result,
    services::TelemetryEngine,
};

/// Run a scoring pass over a race
pub async fn score_race(engine: &TelemetryEngine, req: &ScoreRaceRequest) -> Result<ScoreRaceResponse> {
    engine.score_race(req).await
}

/// Rankings of a race grouped by category
pub async fn race_rankings(engine: &TelemetryEngine, race_id: i32) -> Result<RaceRankingsResponse> {
    engine.race_rankings(race_id).await
}
