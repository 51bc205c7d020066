//! Reconciliation engine: folds raw fragments into canonical records and
//! keeps record aggregates up to date.

use std::sync::Arc;

use chrono::Utc;
use validator::Validate;

use crate::EngineConfig;
use crate::dto::record::{
    AssignRecordRequest, BatchUpdateRecordsRequest, CreateFragmentRequest, MergePreviewResponse,
    MergeRecordsRequest, RecordFilter, RecordResponse,
};
use crate::error::{Result, StorageError};
use crate::models::{Record, Sample};
use crate::repository::{
    FoldedSource, MergeCommit, RecordSamples, SampleReassignment, TelemetryStore,
};
use crate::services::active_window;
use crate::services::aggregate::{self, Aggregates, RecordSummary};
use crate::services::locks::RecordLocks;
use crate::services::merger::{self, MergeSource, MergedSeries};

#[derive(Clone)]
pub struct TelemetryEngine {
    pub(crate) store: Arc<dyn TelemetryStore>,
    locks: RecordLocks,
    pub(crate) config: EngineConfig,
}

/// Sources of a merge request, loaded and checked.
struct PlannedMerge {
    sources: Vec<RecordSamples>,
    merged: MergedSeries,
    aggregates: Aggregates,
}

impl TelemetryEngine {
    pub fn new(store: Arc<dyn TelemetryStore>, config: EngineConfig) -> Self {
        Self {
            store,
            locks: RecordLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn validate_merge_request(request: &MergeRecordsRequest) -> Result<()> {
        request.validate()?;
        request
            .validate_offsets()
            .map_err(StorageError::Validation)
    }

    async fn plan_merge(&self, request: &MergeRecordsRequest) -> Result<PlannedMerge> {
        self.store.find_device(request.device_id).await?;
        if let Some(competition_id) = request.competition_id {
            self.store.find_competition(competition_id).await?;
        }

        let already_merged = self.store.find_merged_sources(&request.record_ids).await?;
        if let Some((source, canonical)) = already_merged.first() {
            tracing::warn!(
                record_id = source,
                canonical_id = canonical,
                "rejecting merge of an already merged record"
            );
            return Err(StorageError::Consistency(format!(
                "record {source} was already merged into record {canonical}"
            )));
        }

        let sources = self
            .store
            .load_records_with_samples(&request.record_ids)
            .await?;

        for id in &request.record_ids {
            let source = sources
                .iter()
                .find(|s| s.record.record_id == *id)
                .ok_or(StorageError::not_found("record", *id))?;
            if source.record.disabled {
                tracing::warn!(record_id = id, "rejecting merge of a disabled record");
                return Err(StorageError::Consistency(format!("record {id} is disabled")));
            }
        }

        let merge_sources: Vec<MergeSource<'_>> = sources
            .iter()
            .map(|source| MergeSource {
                record_id: source.record.record_id,
                offset_ms: request.offset_for(source.record.record_id),
                samples: &source.samples,
            })
            .collect();
        let merged = merger::merge(&merge_sources, self.config.guard_gap_ms)?;

        let aggregates = if merged.sample_count() > 0 {
            aggregate::from_samples(&merged.samples)
        } else {
            let summaries: Vec<RecordSummary> = sources
                .iter()
                .map(|s| RecordSummary::from_record(&s.record, s.samples.len() as i64))
                .collect();
            aggregate::from_summaries(&summaries)
        };

        Ok(PlannedMerge {
            sources,
            merged,
            aggregates,
        })
    }

    /// Merges the requested fragments into one canonical record.
    pub async fn reconcile(&self, request: &MergeRecordsRequest) -> Result<RecordResponse> {
        Self::validate_merge_request(request)?;

        let _guard = self.locks.acquire(&request.record_ids).await;
        let plan = self.plan_merge(request).await?;

        let race_id = plan
            .sources
            .first()
            .and_then(|s| s.record.race_id)
            .filter(|race| plan.sources.iter().all(|s| s.record.race_id == Some(*race)));
        let stop_time = plan
            .sources
            .iter()
            .filter_map(|s| s.record.stop_time)
            .max()
            .unwrap_or_else(|| Utc::now().naive_utc());

        let commit = MergeCommit {
            device_id: request.device_id,
            race_id,
            competition_id: request.competition_id,
            sources: plan
                .sources
                .iter()
                .map(|s| FoldedSource {
                    record_id: s.record.record_id,
                    offset_ms: request.offset_for(s.record.record_id),
                })
                .collect(),
            reassignments: plan
                .merged
                .samples
                .iter()
                .map(|s| SampleReassignment {
                    sample_id: s.sample_id,
                    timestamp: s.timestamp,
                })
                .collect(),
            aggregates: plan.aggregates,
            stop_time,
        };

        let record = self.store.commit_merge(&commit).await?;
        let sample_count = plan.merged.sample_count() as i64;

        tracing::info!(
            record_id = record.record_id,
            sources = ?record.merged_from_ids,
            sample_count,
            "merged fragments into canonical record"
        );

        Ok(RecordResponse::new(record, sample_count))
    }

    /// Computes what [`reconcile`](Self::reconcile) would produce without
    /// writing anything.
    pub async fn preview_merge(&self, request: &MergeRecordsRequest) -> Result<MergePreviewResponse> {
        Self::validate_merge_request(request)?;
        let plan = self.plan_merge(request).await?;

        Ok(MergePreviewResponse {
            sample_count: plan.merged.sample_count(),
            first_timestamp: plan.merged.first_timestamp(),
            last_timestamp: plan.merged.last_timestamp(),
            aggregates: plan.aggregates,
            elapsed_ms: active_window::elapsed_ms(
                &plan.merged.samples,
                self.config.activity_threshold_amps,
            ),
            sources: plan.merged.spans,
        })
    }

    /// Recomputes a record's aggregates from the samples it owns.
    pub async fn recompute_aggregates(&self, record_id: i32) -> Result<Record> {
        let samples = self.store.samples_for_record(record_id).await?;
        if samples.is_empty() {
            return Err(StorageError::Validation(format!(
                "record {record_id} has no sample data"
            )));
        }

        let aggregates = aggregate::from_samples(&samples);
        self.store.update_aggregates(record_id, &aggregates).await
    }

    /// Stores an uploaded fragment with its aggregates.
    pub async fn ingest_fragment(&self, fragment: &CreateFragmentRequest) -> Result<RecordResponse> {
        fragment.validate()?;

        let samples: Vec<Sample> = fragment
            .samples
            .iter()
            .map(|s| Sample {
                sample_id: 0,
                record_id: 0,
                device_id: fragment.device_id,
                session_id: s.session_id,
                timestamp: s.timestamp,
                raw_timestamp: s.timestamp,
                voltage: s.voltage,
                current: s.current,
                energy: s.energy,
            })
            .collect();
        let aggregates = aggregate::from_samples(&samples);

        let record = self.store.create_fragment(fragment, &aggregates).await?;
        tracing::info!(
            record_id = record.record_id,
            device_id = record.device_id,
            sample_count = samples.len(),
            "stored fragment"
        );

        Ok(RecordResponse::new(record, samples.len() as i64))
    }

    /// Soft-deletes or restores a record. Records consumed by a merge stay
    /// disabled.
    pub async fn set_record_disabled(&self, record_id: i32, disabled: bool) -> Result<RecordResponse> {
        let _guard = self.locks.acquire(&[record_id]).await;

        let merged_into = if disabled {
            None
        } else {
            self.store
                .find_merged_sources(&[record_id])
                .await?
                .first()
                .map(|(_, canonical)| *canonical)
        };
        if let Some(canonical) = merged_into {
            return Err(StorageError::Consistency(format!(
                "record {record_id} was merged into record {canonical} and cannot be restored"
            )));
        }

        let record = self.store.set_record_disabled(record_id, disabled).await?;
        let sample_count = self.store.count_samples(record_id).await?;
        Ok(RecordResponse::new(record, sample_count))
    }

    /// Moves a record to another race and/or competition. A record given a
    /// race without a competition follows the race's competition.
    pub async fn assign_record(
        &self,
        record_id: i32,
        request: &AssignRecordRequest,
    ) -> Result<RecordResponse> {
        let mut competition_id = request.competition_id;
        if let Some(race_id) = request.race_id {
            let race = self.store.find_race(race_id).await?;
            if race.completed {
                return Err(StorageError::Consistency(format!(
                    "race {race_id} is already completed"
                )));
            }
            competition_id = competition_id.or(Some(race.competition_id));
        }

        let record = self
            .store
            .assign_record(record_id, request.race_id, competition_id)
            .await?;
        let sample_count = self.store.count_samples(record_id).await?;
        Ok(RecordResponse::new(record, sample_count))
    }

    pub async fn find_record(&self, record_id: i32) -> Result<RecordResponse> {
        let record = self.store.find_record(record_id).await?;
        let sample_count = self.store.count_samples(record_id).await?;
        Ok(RecordResponse::new(record, sample_count))
    }

    /// Edits the sort order and time offset of several records, all or
    /// nothing. Records consumed by a merge keep the values they were merged
    /// with.
    pub async fn update_record_order(
        &self,
        request: &BatchUpdateRecordsRequest,
    ) -> Result<Vec<RecordResponse>> {
        request.validate()?;

        let record_ids = request.record_ids();
        let _guard = self.locks.acquire(&record_ids).await;

        let already_merged = self.store.find_merged_sources(&record_ids).await?;
        if let Some((source, canonical)) = already_merged.first() {
            return Err(StorageError::Consistency(format!(
                "record {source} was merged into record {canonical} and cannot be reordered"
            )));
        }

        let records = self.store.update_record_order(&request.updates).await?;
        tracing::info!(records = records.len(), "updated record ordering");

        let mut responses = Vec::with_capacity(records.len());
        for id in record_ids {
            if let Some(record) = records.iter().find(|r| r.record_id == id) {
                let sample_count = self.store.count_samples(id).await?;
                responses.push(RecordResponse::new(record.clone(), sample_count));
            }
        }
        Ok(responses)
    }

    /// Samples a record owns, in timeline order.
    pub async fn record_samples(&self, record_id: i32) -> Result<Vec<Sample>> {
        self.store.samples_for_record(record_id).await
    }

    pub async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<RecordResponse>> {
        if filter.unassigned && filter.race_id.is_some() {
            return Err(StorageError::Validation(
                "raceId cannot be combined with unassigned".to_string(),
            ));
        }

        let records = self.store.list_records(filter).await?;

        let mut responses = Vec::with_capacity(records.len());
        for record in records {
            let sample_count = self.store.count_samples(record.record_id).await?;
            responses.push(RecordResponse::new(record, sample_count));
        }
        Ok(responses)
    }
}
