use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ranking::RaceRankingEntry;

/// Request payload for a scoring pass over one race.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScoreRaceRequest {
    pub race_id: i32,

    /// Replace finish statuses that were forced by hand.
    #[serde(default)]
    pub overwrite_overrides: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRaceResponse {
    pub race_id: i32,
    pub completed: bool,
    pub rankings_by_category: BTreeMap<String, Vec<RaceRankingEntry>>,
    /// Enabled records of the race whose device has no team.
    pub skipped_record_ids: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RaceRankingsResponse {
    pub race_id: i32,
    pub completed: bool,
    pub rankings_by_category: BTreeMap<String, Vec<RaceRankingEntry>>,
}
