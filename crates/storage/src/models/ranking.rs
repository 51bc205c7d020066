use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Symbolic non-finish outcome of a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "finish_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum FinishStatus {
    /// Did not start
    Dns,
    /// Did not finish
    Dnf,
    /// Disqualified
    Dq,
}

impl FinishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dns => "DNS",
            Self::Dnf => "DNF",
            Self::Dq => "DQ",
        }
    }
}

impl fmt::Display for FinishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one team in one race. At most one exists per (team, race).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Ranking {
    pub ranking_id: i32,
    pub team_id: i32,
    pub race_id: i32,
    pub rank: i32,
    pub score: i32,
    pub elapsed_ms: Option<i64>,
    pub finish_status: Option<FinishStatus>,
    /// Set when the finish status was forced by hand; automatic scoring
    /// passes keep it unless told to overwrite overrides.
    pub status_overridden: bool,
    pub updated_at: chrono::NaiveDateTime,
}
