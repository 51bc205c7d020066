use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Physical logger. A device may be unassigned, in which case its records
/// cannot be placed in a scoring category.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Device {
    pub device_id: i32,
    pub serial_no: i64,
    pub team_id: Option<i32>,
}
