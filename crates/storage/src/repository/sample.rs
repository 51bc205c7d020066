use sqlx::PgPool;

use crate::error::Result;
use crate::models::Sample;

pub struct SampleRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> SampleRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Samples owned by a record, in timeline order
    pub async fn for_record(&self, record_id: i32) -> Result<Vec<Sample>> {
        let samples = sqlx::query_as::<_, Sample>(
            r#"
            SELECT *
            FROM samples
            WHERE record_id = $1
            ORDER BY "timestamp", sample_id
            "#,
        )
        .bind(record_id)
        .fetch_all(self.pool)
        .await?;

        Ok(samples)
    }

    /// Samples owned by any of the given records, grouped by record
    pub async fn for_records(&self, record_ids: &[i32]) -> Result<Vec<Sample>> {
        let samples = sqlx::query_as::<_, Sample>(
            r#"
            SELECT *
            FROM samples
            WHERE record_id = ANY($1)
            ORDER BY record_id, "timestamp", sample_id
            "#,
        )
        .bind(record_ids)
        .fetch_all(self.pool)
        .await?;

        Ok(samples)
    }

    pub async fn count_for_record(&self, record_id: i32) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM samples
            WHERE record_id = $1
            "#,
        )
        .bind(record_id)
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }
}
