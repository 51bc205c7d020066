use sqlx::{FromRow, PgPool};

use crate::error::{Result, StorageError};
use crate::models::{Race, Team};

pub(crate) const SELECT_RACE: &str = r#"
    SELECT r.race_id, r.competition_id, r.event_id,
           e.name AS event_name, e.event_type, r.completed
    FROM races r
    INNER JOIN events e ON e.event_id = r.event_id
    WHERE r.race_id = $1
"#;

pub(crate) const SELECT_DEVICE_TEAMS: &str = r#"
    SELECT d.device_id, t.team_id, t.team_name, t.vehicle_class, t.vehicle_type
    FROM devices d
    INNER JOIN teams t ON t.team_id = d.team_id
    WHERE d.device_id = ANY($1)
"#;

#[derive(FromRow)]
pub(crate) struct DeviceTeamRow {
    pub device_id: i32,
    #[sqlx(flatten)]
    pub team: Team,
}

pub struct RaceRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> RaceRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Race> {
        let race = sqlx::query_as::<_, Race>(SELECT_RACE)
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StorageError::not_found("race", id))?;

        Ok(race)
    }
}
