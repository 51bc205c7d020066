use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// One telemetry reading.
///
/// `raw_timestamp` is the value reported by the logger and never changes.
/// `timestamp` is the position on the owning record's timeline and is only
/// rewritten when the sample is folded into a canonical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Sample {
    pub sample_id: i64,
    pub record_id: i32,
    pub device_id: i32,
    pub session_id: i64,
    pub timestamp: i64,
    pub raw_timestamp: i64,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub energy: Option<f64>,
}
