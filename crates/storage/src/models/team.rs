use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::category::Category;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Team {
    pub team_id: i32,
    pub team_name: String,
    pub vehicle_class: String,
    pub vehicle_type: String,
}

impl Team {
    pub fn category(&self) -> Category {
        Category::new(&self.vehicle_class, &self.vehicle_type)
    }
}
