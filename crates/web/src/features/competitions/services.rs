use storage::{dto::ranking::LeaderboardResponse, error::Result, services::TelemetryEngine};

/// Per-category score totals across every race of a competition
pub async fn leaderboard(engine: &TelemetryEngine, competition_id: i32) -> Result<LeaderboardResponse> {
    engine.leaderboard(competition_id).await
}
