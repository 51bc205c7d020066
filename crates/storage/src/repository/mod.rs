//! Persistence boundary of the reconciliation engine.
//!
//! The engine only talks to storage through [`TelemetryStore`]. Each method
//! that writes more than one row is atomic: it either commits completely or
//! leaves the store untouched.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::dto::record::{CreateFragmentRequest, RecordFilter, RecordOrderUpdate};
use crate::error::Result;
use crate::models::{Competition, Device, FinishStatus, Race, Ranking, Record, Sample, Team};
use crate::services::aggregate::Aggregates;
use crate::services::ranking::ScoredResult;

pub mod competition;
pub mod device;
pub mod memory;
pub mod postgres;
pub mod race;
pub mod ranking;
pub mod record;
pub mod sample;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone)]
pub struct RecordSamples {
    pub record: Record,
    /// Ordered by timestamp.
    pub samples: Vec<Sample>,
}

/// One source of a merge and the offset it was folded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldedSource {
    pub record_id: i32,
    pub offset_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleReassignment {
    pub sample_id: i64,
    pub timestamp: i64,
}

/// Everything needed to commit a merge in one step.
#[derive(Debug, Clone)]
pub struct MergeCommit {
    pub device_id: i32,
    /// Race shared by every source, if any.
    pub race_id: Option<i32>,
    pub competition_id: Option<i32>,
    /// Sources in merge order; the position becomes the source's sort order.
    pub sources: Vec<FoldedSource>,
    pub reassignments: Vec<SampleReassignment>,
    pub aggregates: Aggregates,
    pub stop_time: NaiveDateTime,
}

impl MergeCommit {
    pub fn source_ids(&self) -> Vec<i32> {
        self.sources.iter().map(|s| s.record_id).collect()
    }
}

#[derive(Debug, Clone)]
pub struct RaceEntry {
    pub record: Record,
    pub team: Team,
    /// Ordered by timestamp.
    pub samples: Vec<Sample>,
}

/// Consistent view of everything a scoring pass reads.
#[derive(Debug, Clone)]
pub struct RaceSnapshot {
    pub race: Race,
    /// Enabled records of the race whose device belongs to a team.
    pub entries: Vec<RaceEntry>,
    /// Enabled records of the race whose device has no team.
    pub unassigned_record_ids: Vec<i32>,
    pub rankings: Vec<Ranking>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingUpsert {
    pub team_id: i32,
    pub rank: i32,
    pub score: i32,
    pub elapsed_ms: Option<i64>,
    pub finish_status: Option<FinishStatus>,
    pub status_overridden: bool,
}

impl From<&ScoredResult> for RankingUpsert {
    fn from(result: &ScoredResult) -> Self {
        Self {
            team_id: result.team_id,
            rank: result.rank,
            score: result.score,
            elapsed_ms: result.elapsed_ms,
            finish_status: result.finish_status,
            status_overridden: result.status_overridden,
        }
    }
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn find_device(&self, device_id: i32) -> Result<Device>;

    async fn find_competition(&self, competition_id: i32) -> Result<Competition>;

    async fn find_race(&self, race_id: i32) -> Result<Race>;

    async fn find_record(&self, record_id: i32) -> Result<Record>;

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<Record>>;

    async fn count_samples(&self, record_id: i32) -> Result<i64>;

    /// Samples of a record ordered by timestamp.
    async fn samples_for_record(&self, record_id: i32) -> Result<Vec<Sample>>;

    /// Loads the requested records with their samples. Missing ids are
    /// simply absent from the result.
    async fn load_records_with_samples(&self, record_ids: &[i32]) -> Result<Vec<RecordSamples>>;

    /// Returns `(source_id, canonical_id)` for every given id that already
    /// appears in some record's provenance list.
    async fn find_merged_sources(&self, record_ids: &[i32]) -> Result<Vec<(i32, i32)>>;

    /// Creates a raw fragment and its samples.
    async fn create_fragment(
        &self,
        fragment: &CreateFragmentRequest,
        aggregates: &Aggregates,
    ) -> Result<Record>;

    /// Creates the canonical record, re-owns and re-timestamps the samples
    /// and disables the sources. Fails without effect when any source is
    /// missing, already disabled or already merged.
    async fn commit_merge(&self, commit: &MergeCommit) -> Result<Record>;

    async fn update_aggregates(&self, record_id: i32, aggregates: &Aggregates) -> Result<Record>;

    async fn set_record_disabled(&self, record_id: i32, disabled: bool) -> Result<Record>;

    /// Applies sort order and time offset edits to several records, all or
    /// nothing. Fails with not found when any record is missing.
    async fn update_record_order(&self, updates: &[RecordOrderUpdate]) -> Result<Vec<Record>>;

    async fn assign_record(
        &self,
        record_id: i32,
        race_id: Option<i32>,
        competition_id: Option<i32>,
    ) -> Result<Record>;

    async fn load_race_snapshot(&self, race_id: i32) -> Result<RaceSnapshot>;

    /// Upserts one ranking per team, removes rankings of teams no longer in
    /// the race and marks the race completed, all or nothing.
    ///
    /// A stored ranking whose status was forced by hand is left as it is
    /// unless `overwrite_overrides` is set, even when the override was written
    /// after the scoring pass read the race. Returns every ranking of the race
    /// as stored after the commit.
    async fn commit_race_scores(
        &self,
        race_id: i32,
        rankings: &[RankingUpsert],
        overwrite_overrides: bool,
    ) -> Result<Vec<Ranking>>;

    async fn race_rankings(&self, race_id: i32) -> Result<Vec<(Ranking, Team)>>;

    async fn set_finish_status(
        &self,
        ranking_id: i32,
        finish_status: Option<FinishStatus>,
    ) -> Result<Ranking>;

    async fn competition_rankings(&self, competition_id: i32) -> Result<Vec<(Ranking, Team)>>;
}
