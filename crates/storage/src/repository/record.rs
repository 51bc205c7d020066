use sqlx::{PgPool, QueryBuilder};

use crate::dto::record::{RecordFilter, RecordOrderUpdate};
use crate::error::{Result, StorageError};
use crate::models::Record;
use crate::services::aggregate::Aggregates;

pub(crate) const SELECT_MERGED_SOURCES: &str = r#"
    SELECT source_id, r.record_id AS canonical_id
    FROM records r, UNNEST(r.merged_from_ids) AS source_id
    WHERE source_id = ANY($1)
"#;

/// Repository for Record database operations
pub struct RecordRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> RecordRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Record> {
        let record = sqlx::query_as::<_, Record>(
            r#"
            SELECT *
            FROM records
            WHERE record_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(StorageError::not_found("record", id))?;

        Ok(record)
    }

    /// List records matching the filter, in display order
    pub async fn list(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        let mut query = QueryBuilder::new("SELECT * FROM records WHERE 1=1");

        if !filter.include_disabled {
            query.push(" AND disabled = FALSE");
        }

        if let Some(competition_id) = filter.competition_id {
            query.push(" AND competition_id = ");
            query.push_bind(competition_id);
        }

        if let Some(race_id) = filter.race_id {
            query.push(" AND race_id = ");
            query.push_bind(race_id);
        }

        if let Some(device_id) = filter.device_id {
            query.push(" AND device_id = ");
            query.push_bind(device_id);
        }

        if let Some(team_id) = filter.team_id {
            query.push(" AND device_id IN (SELECT device_id FROM devices WHERE team_id = ");
            query.push_bind(team_id);
            query.push(")");
        }

        if filter.unassigned {
            query.push(" AND race_id IS NULL");
        }

        query.push(" ORDER BY sort_order, record_id");

        let records = query.build_query_as::<Record>().fetch_all(self.pool).await?;

        Ok(records)
    }

    pub async fn find_by_ids(&self, ids: &[i32]) -> Result<Vec<Record>> {
        let records = sqlx::query_as::<_, Record>(
            r#"
            SELECT *
            FROM records
            WHERE record_id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// `(source_id, canonical_id)` pairs for ids found in a provenance list
    pub async fn find_merged_sources(&self, ids: &[i32]) -> Result<Vec<(i32, i32)>> {
        let pairs = sqlx::query_as::<_, (i32, i32)>(SELECT_MERGED_SOURCES)
            .bind(ids)
            .fetch_all(self.pool)
            .await?;

        Ok(pairs)
    }

    pub async fn update_aggregates(&self, id: i32, aggregates: &Aggregates) -> Result<Record> {
        let record = sqlx::query_as::<_, Record>(
            r#"
            UPDATE records
            SET avg_voltage = $2,
                avg_current = $3,
                energy = $4
            WHERE record_id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(aggregates.avg_voltage)
        .bind(aggregates.avg_current)
        .bind(aggregates.energy)
        .fetch_optional(self.pool)
        .await?
        .ok_or(StorageError::not_found("record", id))?;

        Ok(record)
    }

    pub async fn set_disabled(&self, id: i32, disabled: bool) -> Result<Record> {
        let record = sqlx::query_as::<_, Record>(
            r#"
            UPDATE records
            SET disabled = $2
            WHERE record_id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(disabled)
        .fetch_optional(self.pool)
        .await?
        .ok_or(StorageError::not_found("record", id))?;

        Ok(record)
    }

    /// Applies ordering edits in one transaction
    pub async fn update_order(&self, updates: &[RecordOrderUpdate]) -> Result<Vec<Record>> {
        let ids: Vec<i32> = updates.iter().map(|u| u.record_id).collect();
        let sort_orders: Vec<Option<i32>> = updates.iter().map(|u| u.sort_order).collect();
        let time_offsets: Vec<Option<i64>> = updates.iter().map(|u| u.time_offset).collect();

        let mut tx = self.pool.begin().await?;

        let records = sqlx::query_as::<_, Record>(
            r#"
            UPDATE records r
            SET sort_order = COALESCE(u.sort_order, r.sort_order),
                time_offset = COALESCE(u.time_offset, r.time_offset)
            FROM UNNEST($1::int[], $2::int[], $3::bigint[]) AS u(record_id, sort_order, time_offset)
            WHERE r.record_id = u.record_id
            RETURNING r.*
            "#,
        )
        .bind(&ids)
        .bind(&sort_orders)
        .bind(&time_offsets)
        .fetch_all(&mut *tx)
        .await?;

        if let Some(missing) = ids
            .iter()
            .find(|id| !records.iter().any(|r| r.record_id == **id))
        {
            return Err(StorageError::not_found("record", *missing));
        }

        tx.commit().await?;

        Ok(records)
    }

    pub async fn assign(
        &self,
        id: i32,
        race_id: Option<i32>,
        competition_id: Option<i32>,
    ) -> Result<Record> {
        let record = sqlx::query_as::<_, Record>(
            r#"
            UPDATE records
            SET race_id = $2,
                competition_id = $3
            WHERE record_id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(race_id)
        .bind(competition_id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| StorageError::from(e).into_consistency("Cannot assign record"))?
        .ok_or(StorageError::not_found("record", id))?;

        Ok(record)
    }
}
