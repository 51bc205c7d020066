use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// A scheduled scoring event. Event name and type come from the joined
/// event definition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Race {
    pub race_id: i32,
    pub competition_id: i32,
    pub event_id: i32,
    pub event_name: String,
    pub event_type: String,
    pub completed: bool,
}
