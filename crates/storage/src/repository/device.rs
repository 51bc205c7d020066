use sqlx::PgPool;

use crate::error::{Result, StorageError};
use crate::models::Device;

pub struct DeviceRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> DeviceRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Device> {
        let device = sqlx::query_as::<_, Device>(
            r#"
            SELECT device_id, serial_no, team_id
            FROM devices
            WHERE device_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(StorageError::not_found("device", id))?;

        Ok(device)
    }
}
