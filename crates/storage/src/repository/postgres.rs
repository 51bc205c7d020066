//! PostgreSQL implementation of [`TelemetryStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::competition::CompetitionRepository;
use super::device::DeviceRepository;
use super::race::{DeviceTeamRow, RaceRepository, SELECT_DEVICE_TEAMS, SELECT_RACE};
use super::ranking::RankingRepository;
use super::record::{RecordRepository, SELECT_MERGED_SOURCES};
use super::sample::SampleRepository;
use super::{MergeCommit, RaceEntry, RaceSnapshot, RankingUpsert, RecordSamples, TelemetryStore};
use crate::dto::record::{CreateFragmentRequest, RecordFilter, RecordOrderUpdate};
use crate::error::{Result, StorageError};
use crate::models::{Competition, Device, FinishStatus, Race, Ranking, Record, Sample, Team};
use crate::services::aggregate::Aggregates;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn ensure_exists(
    tx: &mut Transaction<'_, Postgres>,
    query: &str,
    entity: &'static str,
    id: i32,
) -> Result<()> {
    let found = sqlx::query_scalar::<_, i32>(query)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

    found.map(|_| ()).ok_or(StorageError::not_found(entity, id))
}

async fn ensure_competition(tx: &mut Transaction<'_, Postgres>, id: i32) -> Result<()> {
    ensure_exists(
        tx,
        "SELECT competition_id FROM competitions WHERE competition_id = $1",
        "competition",
        id,
    )
    .await
}

async fn ensure_device(tx: &mut Transaction<'_, Postgres>, id: i32) -> Result<()> {
    ensure_exists(tx, "SELECT device_id FROM devices WHERE device_id = $1", "device", id).await
}

fn group_by_record(samples: Vec<Sample>) -> HashMap<i32, Vec<Sample>> {
    let mut grouped: HashMap<i32, Vec<Sample>> = HashMap::new();
    for sample in samples {
        grouped.entry(sample.record_id).or_default().push(sample);
    }
    grouped
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn find_device(&self, device_id: i32) -> Result<Device> {
        DeviceRepository::new(&self.pool).find_by_id(device_id).await
    }

    async fn find_competition(&self, competition_id: i32) -> Result<Competition> {
        CompetitionRepository::new(&self.pool)
            .find_by_id(competition_id)
            .await
    }

    async fn find_race(&self, race_id: i32) -> Result<Race> {
        RaceRepository::new(&self.pool).find_by_id(race_id).await
    }

    async fn find_record(&self, record_id: i32) -> Result<Record> {
        RecordRepository::new(&self.pool).find_by_id(record_id).await
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        RecordRepository::new(&self.pool).list(filter).await
    }

    async fn count_samples(&self, record_id: i32) -> Result<i64> {
        RecordRepository::new(&self.pool).find_by_id(record_id).await?;
        SampleRepository::new(&self.pool)
            .count_for_record(record_id)
            .await
    }

    async fn samples_for_record(&self, record_id: i32) -> Result<Vec<Sample>> {
        RecordRepository::new(&self.pool).find_by_id(record_id).await?;
        SampleRepository::new(&self.pool).for_record(record_id).await
    }

    async fn load_records_with_samples(&self, record_ids: &[i32]) -> Result<Vec<RecordSamples>> {
        let records = RecordRepository::new(&self.pool)
            .find_by_ids(record_ids)
            .await?;
        let mut samples = group_by_record(
            SampleRepository::new(&self.pool)
                .for_records(record_ids)
                .await?,
        );

        let mut by_id: HashMap<i32, Record> =
            records.into_iter().map(|r| (r.record_id, r)).collect();

        Ok(record_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .map(|record| RecordSamples {
                samples: samples.remove(&record.record_id).unwrap_or_default(),
                record,
            })
            .collect())
    }

    async fn find_merged_sources(&self, record_ids: &[i32]) -> Result<Vec<(i32, i32)>> {
        RecordRepository::new(&self.pool)
            .find_merged_sources(record_ids)
            .await
    }

    async fn create_fragment(
        &self,
        fragment: &CreateFragmentRequest,
        aggregates: &Aggregates,
    ) -> Result<Record> {
        let mut tx = self.pool.begin().await?;

        ensure_device(&mut tx, fragment.device_id).await?;

        let mut competition_id = fragment.competition_id;
        if let Some(race_id) = fragment.race_id {
            let (race_competition, completed) = sqlx::query_as::<_, (i32, bool)>(
                "SELECT competition_id, completed FROM races WHERE race_id = $1 FOR SHARE",
            )
            .bind(race_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StorageError::not_found("race", race_id))?;

            if completed {
                return Err(StorageError::Consistency(format!(
                    "race {race_id} is already completed"
                )));
            }
            competition_id = competition_id.or(Some(race_competition));
        }
        if let Some(id) = competition_id {
            ensure_competition(&mut tx, id).await?;
        }

        let record = sqlx::query_as::<_, Record>(
            r#"
            INSERT INTO records (device_id, race_id, competition_id, avg_voltage, avg_current, energy, stop_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(fragment.device_id)
        .bind(fragment.race_id)
        .bind(competition_id)
        .bind(aggregates.avg_voltage)
        .bind(aggregates.avg_current)
        .bind(aggregates.energy)
        .bind(fragment.stop_time)
        .fetch_one(&mut *tx)
        .await?;

        let session_ids: Vec<i64> = fragment.samples.iter().map(|s| s.session_id).collect();
        let timestamps: Vec<i64> = fragment.samples.iter().map(|s| s.timestamp).collect();
        let voltages: Vec<Option<f64>> = fragment.samples.iter().map(|s| s.voltage).collect();
        let currents: Vec<Option<f64>> = fragment.samples.iter().map(|s| s.current).collect();
        let energies: Vec<Option<f64>> = fragment.samples.iter().map(|s| s.energy).collect();

        sqlx::query(
            r#"
            INSERT INTO samples (record_id, device_id, session_id, "timestamp", raw_timestamp, voltage, "current", energy)
            SELECT $1, $2, u.session_id, u.ts, u.ts, u.voltage, u.amps, u.energy
            FROM UNNEST($3::bigint[], $4::bigint[], $5::float8[], $6::float8[], $7::float8[])
                AS u(session_id, ts, voltage, amps, energy)
            "#,
        )
        .bind(record.record_id)
        .bind(fragment.device_id)
        .bind(&session_ids)
        .bind(&timestamps)
        .bind(&voltages)
        .bind(&currents)
        .bind(&energies)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(record)
    }

    async fn commit_merge(&self, commit: &MergeCommit) -> Result<Record> {
        let source_ids = commit.source_ids();
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query_as::<_, Record>(
            r#"
            SELECT *
            FROM records
            WHERE record_id = ANY($1)
            ORDER BY record_id
            FOR UPDATE
            "#,
        )
        .bind(&source_ids)
        .fetch_all(&mut *tx)
        .await?;

        for id in &source_ids {
            let source = locked
                .iter()
                .find(|r| r.record_id == *id)
                .ok_or(StorageError::not_found("record", *id))?;
            if source.disabled {
                return Err(StorageError::Consistency(format!("record {id} is disabled")));
            }
        }

        let merged = sqlx::query_as::<_, (i32, i32)>(SELECT_MERGED_SOURCES)
            .bind(&source_ids)
            .fetch_all(&mut *tx)
            .await?;
        if let Some((source, canonical)) = merged.first() {
            return Err(StorageError::Consistency(format!(
                "record {source} was already merged into record {canonical}"
            )));
        }

        ensure_device(&mut tx, commit.device_id).await?;
        if let Some(id) = commit.competition_id {
            ensure_competition(&mut tx, id).await?;
        }

        let canonical = sqlx::query_as::<_, Record>(
            r#"
            INSERT INTO records (device_id, race_id, competition_id, avg_voltage, avg_current, energy, stop_time, merged_from_ids)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(commit.device_id)
        .bind(commit.race_id)
        .bind(commit.competition_id)
        .bind(commit.aggregates.avg_voltage)
        .bind(commit.aggregates.avg_current)
        .bind(commit.aggregates.energy)
        .bind(commit.stop_time)
        .bind(&source_ids)
        .fetch_one(&mut *tx)
        .await?;

        let owned = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM samples WHERE record_id = ANY($1)",
        )
        .bind(&source_ids)
        .fetch_one(&mut *tx)
        .await?;
        if owned != commit.reassignments.len() as i64 {
            return Err(StorageError::Consistency(
                "source samples changed while merging".to_string(),
            ));
        }

        let sample_ids: Vec<i64> = commit.reassignments.iter().map(|r| r.sample_id).collect();
        let timestamps: Vec<i64> = commit.reassignments.iter().map(|r| r.timestamp).collect();

        let moved = sqlx::query(
            r#"
            UPDATE samples s
            SET record_id = $1,
                "timestamp" = u.ts
            FROM UNNEST($2::bigint[], $3::bigint[]) AS u(sample_id, ts)
            WHERE s.sample_id = u.sample_id
              AND s.record_id = ANY($4)
            "#,
        )
        .bind(canonical.record_id)
        .bind(&sample_ids)
        .bind(&timestamps)
        .bind(&source_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if moved != sample_ids.len() as u64 {
            return Err(StorageError::Consistency(
                "a sample does not belong to a merge source".to_string(),
            ));
        }

        let offsets: Vec<i64> = commit.sources.iter().map(|s| s.offset_ms).collect();
        let positions: Vec<i32> = (0..commit.sources.len() as i32).collect();

        let disabled = sqlx::query(
            r#"
            UPDATE records r
            SET disabled = TRUE,
                time_offset = u.time_offset,
                sort_order = u.position
            FROM UNNEST($1::int[], $2::bigint[], $3::int[]) AS u(record_id, time_offset, position)
            WHERE r.record_id = u.record_id
              AND r.disabled = FALSE
            "#,
        )
        .bind(&source_ids)
        .bind(&offsets)
        .bind(&positions)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if disabled != source_ids.len() as u64 {
            return Err(StorageError::Consistency(
                "a merge source was disabled concurrently".to_string(),
            ));
        }

        tx.commit().await?;

        Ok(canonical)
    }

    async fn update_aggregates(&self, record_id: i32, aggregates: &Aggregates) -> Result<Record> {
        RecordRepository::new(&self.pool)
            .update_aggregates(record_id, aggregates)
            .await
    }

    async fn set_record_disabled(&self, record_id: i32, disabled: bool) -> Result<Record> {
        RecordRepository::new(&self.pool)
            .set_disabled(record_id, disabled)
            .await
    }

    async fn update_record_order(&self, updates: &[RecordOrderUpdate]) -> Result<Vec<Record>> {
        RecordRepository::new(&self.pool).update_order(updates).await
    }

    async fn assign_record(
        &self,
        record_id: i32,
        race_id: Option<i32>,
        competition_id: Option<i32>,
    ) -> Result<Record> {
        if let Some(id) = competition_id {
            CompetitionRepository::new(&self.pool).find_by_id(id).await?;
        }
        if let Some(id) = race_id {
            RaceRepository::new(&self.pool).find_by_id(id).await?;
        }
        RecordRepository::new(&self.pool)
            .assign(record_id, race_id, competition_id)
            .await
    }

    async fn load_race_snapshot(&self, race_id: i32) -> Result<RaceSnapshot> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let race = sqlx::query_as::<_, Race>(SELECT_RACE)
            .bind(race_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StorageError::not_found("race", race_id))?;

        let records = sqlx::query_as::<_, Record>(
            r#"
            SELECT *
            FROM records
            WHERE race_id = $1 AND disabled = FALSE
            ORDER BY record_id
            "#,
        )
        .bind(race_id)
        .fetch_all(&mut *tx)
        .await?;

        let device_ids: Vec<i32> = records.iter().map(|r| r.device_id).collect();
        let teams: HashMap<i32, Team> = sqlx::query_as::<_, DeviceTeamRow>(SELECT_DEVICE_TEAMS)
            .bind(&device_ids)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|row| (row.device_id, row.team))
            .collect();

        let record_ids: Vec<i32> = records.iter().map(|r| r.record_id).collect();
        let mut samples = group_by_record(
            sqlx::query_as::<_, Sample>(
                r#"
                SELECT *
                FROM samples
                WHERE record_id = ANY($1)
                ORDER BY record_id, "timestamp", sample_id
                "#,
            )
            .bind(&record_ids)
            .fetch_all(&mut *tx)
            .await?,
        );

        let rankings = sqlx::query_as::<_, Ranking>("SELECT * FROM rankings WHERE race_id = $1")
            .bind(race_id)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        let mut entries = Vec::with_capacity(records.len());
        let mut unassigned_record_ids = Vec::new();
        for record in records {
            match teams.get(&record.device_id) {
                Some(team) => entries.push(RaceEntry {
                    samples: samples.remove(&record.record_id).unwrap_or_default(),
                    team: team.clone(),
                    record,
                }),
                None => unassigned_record_ids.push(record.record_id),
            }
        }

        Ok(RaceSnapshot {
            race,
            entries,
            unassigned_record_ids,
            rankings,
        })
    }

    async fn commit_race_scores(
        &self,
        race_id: i32,
        rankings: &[RankingUpsert],
        overwrite_overrides: bool,
    ) -> Result<Vec<Ranking>> {
        let mut tx = self.pool.begin().await?;

        ensure_exists(
            &mut tx,
            "SELECT race_id FROM races WHERE race_id = $1 FOR UPDATE",
            "race",
            race_id,
        )
        .await?;

        let team_ids: Vec<i32> = rankings.iter().map(|r| r.team_id).collect();
        let ranks: Vec<i32> = rankings.iter().map(|r| r.rank).collect();
        let scores: Vec<i32> = rankings.iter().map(|r| r.score).collect();
        let elapsed: Vec<Option<i64>> = rankings.iter().map(|r| r.elapsed_ms).collect();
        let statuses: Vec<Option<&'static str>> = rankings
            .iter()
            .map(|r| r.finish_status.map(|s| s.as_str()))
            .collect();
        let overridden: Vec<bool> = rankings.iter().map(|r| r.status_overridden).collect();

        // Rows forced by hand stay untouched unless overrides are overwritten
        sqlx::query(
            r#"
            INSERT INTO rankings (team_id, race_id, rank, score, elapsed_ms, finish_status, status_overridden, updated_at)
            SELECT u.team_id, $1, u.rank, u.score, u.elapsed_ms, u.finish_status::finish_status, u.status_overridden, NOW()
            FROM UNNEST($2::int[], $3::int[], $4::int[], $5::bigint[], $6::text[], $7::bool[])
                AS u(team_id, rank, score, elapsed_ms, finish_status, status_overridden)
            ON CONFLICT (team_id, race_id) DO UPDATE
            SET rank = EXCLUDED.rank,
                score = EXCLUDED.score,
                elapsed_ms = EXCLUDED.elapsed_ms,
                finish_status = EXCLUDED.finish_status,
                status_overridden = EXCLUDED.status_overridden,
                updated_at = EXCLUDED.updated_at
            WHERE NOT rankings.status_overridden OR $8
            "#,
        )
        .bind(race_id)
        .bind(&team_ids)
        .bind(&ranks)
        .bind(&scores)
        .bind(&elapsed)
        .bind(&statuses)
        .bind(&overridden)
        .bind(overwrite_overrides)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM rankings WHERE race_id = $1 AND team_id <> ALL($2)")
            .bind(race_id)
            .bind(&team_ids)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE races SET completed = TRUE WHERE race_id = $1")
            .bind(race_id)
            .execute(&mut *tx)
            .await?;

        let persisted = sqlx::query_as::<_, Ranking>(
            "SELECT * FROM rankings WHERE race_id = $1 ORDER BY rank, team_id",
        )
        .bind(race_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(persisted)
    }

    async fn race_rankings(&self, race_id: i32) -> Result<Vec<(Ranking, Team)>> {
        RaceRepository::new(&self.pool).find_by_id(race_id).await?;
        RankingRepository::new(&self.pool).for_race(race_id).await
    }

    async fn set_finish_status(
        &self,
        ranking_id: i32,
        finish_status: Option<FinishStatus>,
    ) -> Result<Ranking> {
        RankingRepository::new(&self.pool)
            .set_finish_status(ranking_id, finish_status)
            .await
    }

    async fn competition_rankings(&self, competition_id: i32) -> Result<Vec<(Ranking, Team)>> {
        CompetitionRepository::new(&self.pool)
            .find_by_id(competition_id)
            .await?;
        RankingRepository::new(&self.pool)
            .for_competition(competition_id)
            .await
    }
}
