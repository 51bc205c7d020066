use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// A recording fragment as uploaded, or a canonical record produced by a merge.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Record {
    pub record_id: i32,
    pub device_id: i32,
    pub race_id: Option<i32>,
    pub competition_id: Option<i32>,
    pub avg_voltage: Option<f64>,
    pub avg_current: Option<f64>,
    pub energy: Option<f64>,
    pub stop_time: Option<NaiveDateTime>,
    pub disabled: bool,
    /// Source records folded into this one, in merge order. Empty for raw fragments.
    pub merged_from_ids: Vec<i32>,
    pub time_offset: i64,
    pub sort_order: i32,
    pub created_at: NaiveDateTime,
}

impl Record {
    pub fn is_canonical(&self) -> bool {
        !self.merged_from_ids.is_empty()
    }
}
