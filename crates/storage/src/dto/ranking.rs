use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{FinishStatus, Ranking, Team};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RaceRankingEntry {
    pub ranking_id: i32,
    pub team_id: i32,
    pub team_name: String,
    pub rank: i32,
    pub score: i32,
    pub elapsed_ms: Option<i64>,
    pub finish_status: Option<FinishStatus>,
    pub status_overridden: bool,
}

impl RaceRankingEntry {
    pub fn from_ranking(ranking: &Ranking, team: &Team) -> Self {
        Self {
            ranking_id: ranking.ranking_id,
            team_id: ranking.team_id,
            team_name: team.team_name.clone(),
            rank: ranking.rank,
            score: ranking.score,
            elapsed_ms: ranking.elapsed_ms,
            finish_status: ranking.finish_status,
            status_overridden: ranking.status_overridden,
        }
    }
}

/// Forces a ranking to a non-finish status, or clears a previous override
/// when `finish_status` is null.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FinishStatusOverrideRequest {
    pub finish_status: Option<FinishStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub team_id: i32,
    pub team_name: String,
    pub total_score: i64,
    pub races_scored: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub competition_id: i32,
    pub categories: BTreeMap<String, Vec<LeaderboardEntry>>,
}
