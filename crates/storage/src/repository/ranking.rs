use sqlx::{FromRow, PgPool};

use crate::error::{Result, StorageError};
use crate::models::{FinishStatus, Ranking, Team};

#[derive(FromRow)]
struct RankingTeamRow {
    #[sqlx(flatten)]
    ranking: Ranking,
    team_name: String,
    vehicle_class: String,
    vehicle_type: String,
}

impl RankingTeamRow {
    fn into_pair(self) -> (Ranking, Team) {
        let team = Team {
            team_id: self.ranking.team_id,
            team_name: self.team_name,
            vehicle_class: self.vehicle_class,
            vehicle_type: self.vehicle_type,
        };
        (self.ranking, team)
    }
}

pub struct RankingRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> RankingRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn for_race(&self, race_id: i32) -> Result<Vec<(Ranking, Team)>> {
        let rows = sqlx::query_as::<_, RankingTeamRow>(
            r#"
            SELECT rk.*, t.team_name, t.vehicle_class, t.vehicle_type
            FROM rankings rk
            INNER JOIN teams t ON t.team_id = rk.team_id
            WHERE rk.race_id = $1
            ORDER BY t.vehicle_class, t.vehicle_type, rk.rank
            "#,
        )
        .bind(race_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(RankingTeamRow::into_pair).collect())
    }

    pub async fn for_competition(&self, competition_id: i32) -> Result<Vec<(Ranking, Team)>> {
        let rows = sqlx::query_as::<_, RankingTeamRow>(
            r#"
            SELECT rk.*, t.team_name, t.vehicle_class, t.vehicle_type
            FROM rankings rk
            INNER JOIN teams t ON t.team_id = rk.team_id
            INNER JOIN races r ON r.race_id = rk.race_id
            WHERE r.competition_id = $1
            ORDER BY rk.race_id, rk.rank
            "#,
        )
        .bind(competition_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(RankingTeamRow::into_pair).collect())
    }

    /// Forces a non-finish status with score 0, or clears the override.
    /// Clearing leaves the score as is until the race is scored again.
    pub async fn set_finish_status(
        &self,
        ranking_id: i32,
        finish_status: Option<FinishStatus>,
    ) -> Result<Ranking> {
        let ranking = sqlx::query_as::<_, Ranking>(
            r#"
            UPDATE rankings
            SET finish_status = $2::finish_status,
                status_overridden = $2::finish_status IS NOT NULL,
                score = CASE WHEN $2::finish_status IS NULL THEN score ELSE 0 END,
                updated_at = NOW()
            WHERE ranking_id = $1
            RETURNING *
            "#,
        )
        .bind(ranking_id)
        .bind(finish_status)
        .fetch_optional(self.pool)
        .await?
        .ok_or(StorageError::not_found("ranking", ranking_id))?;

        Ok(ranking)
    }
}
