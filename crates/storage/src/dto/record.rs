use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::Record;
use crate::services::aggregate::Aggregates;
use crate::services::merger::{MAX_OFFSET_MS, MAX_TIMESTAMP_MS, SourceSpan};

/// Caller-supplied shift for one merge source.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimeOffset {
    pub record_id: i32,

    #[validate(range(
        min = 0,
        max = MAX_OFFSET_MS,
        message = "Offset must be between 0 and 86400000 ms"
    ))]
    pub offset: i64,
}

/// Request payload for reconciling fragments into one canonical record.
///
/// Sources are folded in `record_ids` order. Sources without an entry in
/// `time_offsets` are folded with a zero offset.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MergeRecordsRequest {
    #[validate(length(min = 2, message = "At least 2 record IDs are required"))]
    #[validate(custom(function = "validate_unique_ids"))]
    pub record_ids: Vec<i32>,

    #[serde(default)]
    #[validate(nested)]
    pub time_offsets: Vec<TimeOffset>,

    pub competition_id: Option<i32>,

    pub device_id: i32,
}

impl MergeRecordsRequest {
    /// Checks that every offset refers to a listed source, at most once.
    pub fn validate_offsets(&self) -> Result<(), String> {
        let listed: HashSet<i32> = self.record_ids.iter().copied().collect();
        let mut seen = HashSet::new();

        for entry in &self.time_offsets {
            if !listed.contains(&entry.record_id) {
                return Err(format!(
                    "Time offset given for record {} which is not being merged",
                    entry.record_id
                ));
            }
            if !seen.insert(entry.record_id) {
                return Err(format!(
                    "Time offset given more than once for record {}",
                    entry.record_id
                ));
            }
        }

        Ok(())
    }

    pub fn offset_for(&self, record_id: i32) -> i64 {
        self.time_offsets
            .iter()
            .find(|entry| entry.record_id == record_id)
            .map_or(0, |entry| entry.offset)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecomputeAggregatesRequest {
    pub record_id: i32,
}

/// One reading in an upload.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewSample {
    pub session_id: i64,

    #[validate(range(
        min = 0,
        max = MAX_TIMESTAMP_MS,
        message = "Timestamp must be a non-negative epoch or logger time in ms"
    ))]
    pub timestamp: i64,

    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub energy: Option<f64>,
}

/// Request payload for uploading a raw recording fragment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateFragmentRequest {
    pub device_id: i32,
    pub race_id: Option<i32>,
    pub competition_id: Option<i32>,
    pub stop_time: Option<NaiveDateTime>,

    #[validate(length(min = 1, message = "A fragment needs at least one sample"))]
    #[validate(nested)]
    pub samples: Vec<NewSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToggleRecordRequest {
    pub disabled: bool,
}

/// Replaces the race and competition a record belongs to. When only a race
/// is given, the record follows the race's competition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AssignRecordRequest {
    pub race_id: Option<i32>,
    pub competition_id: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct RecordFilter {
    pub competition_id: Option<i32>,
    pub race_id: Option<i32>,
    pub device_id: Option<i32>,
    /// Records of devices belonging to this team.
    pub team_id: Option<i32>,
    /// Only records not yet assigned to a race.
    #[serde(default)]
    pub unassigned: bool,
    #[serde(default)]
    pub include_disabled: bool,
}

/// New ordering hints for one record. Absent fields are left unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecordOrderUpdate {
    pub record_id: i32,

    #[validate(range(min = 0, message = "Sort order must not be negative"))]
    pub sort_order: Option<i32>,

    #[validate(range(
        min = 0,
        max = MAX_OFFSET_MS,
        message = "Time offset must be between 0 and 86400000 ms"
    ))]
    pub time_offset: Option<i64>,
}

/// Request payload for editing the sort order and time offset of several
/// records at once, ahead of a merge.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BatchUpdateRecordsRequest {
    #[validate(length(min = 1, message = "At least one update is required"))]
    #[validate(custom(function = "validate_unique_updates"))]
    #[validate(nested)]
    pub updates: Vec<RecordOrderUpdate>,
}

impl BatchUpdateRecordsRequest {
    pub fn record_ids(&self) -> Vec<i32> {
        self.updates.iter().map(|u| u.record_id).collect()
    }
}

/// Record as returned to callers, with the number of samples it owns.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordResponse {
    pub record_id: i32,
    pub device_id: i32,
    pub race_id: Option<i32>,
    pub competition_id: Option<i32>,
    pub avg_voltage: Option<f64>,
    pub avg_current: Option<f64>,
    pub energy: Option<f64>,
    pub stop_time: Option<NaiveDateTime>,
    pub disabled: bool,
    pub merged_from_ids: Vec<i32>,
    pub time_offset: i64,
    pub sort_order: i32,
    pub created_at: NaiveDateTime,
    pub sample_count: i64,
}

impl RecordResponse {
    pub fn new(record: Record, sample_count: i64) -> Self {
        Self {
            record_id: record.record_id,
            device_id: record.device_id,
            race_id: record.race_id,
            competition_id: record.competition_id,
            avg_voltage: record.avg_voltage,
            avg_current: record.avg_current,
            energy: record.energy,
            stop_time: record.stop_time,
            disabled: record.disabled,
            merged_from_ids: record.merged_from_ids,
            time_offset: record.time_offset,
            sort_order: record.sort_order,
            created_at: record.created_at,
            sample_count,
        }
    }
}

/// What a merge would produce, computed without writing anything.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MergePreviewResponse {
    pub sources: Vec<SourceSpan>,
    pub sample_count: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    pub aggregates: Aggregates,
    pub elapsed_ms: Option<i64>,
}

fn validate_unique_ids(ids: &[i32]) -> Result<(), validator::ValidationError> {
    let mut seen = HashSet::new();
    if ids.iter().all(|id| seen.insert(*id)) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("duplicate_record_id"))
    }
}

fn validate_unique_updates(updates: &[RecordOrderUpdate]) -> Result<(), validator::ValidationError> {
    let ids: Vec<i32> = updates.iter().map(|u| u.record_id).collect();
    validate_unique_ids(&ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(record_ids: Vec<i32>, time_offsets: Vec<(i32, i64)>) -> MergeRecordsRequest {
        MergeRecordsRequest {
            record_ids,
            time_offsets: time_offsets
                .into_iter()
                .map(|(record_id, offset)| TimeOffset { record_id, offset })
                .collect(),
            competition_id: None,
            device_id: 1,
        }
    }

    #[test]
    fn test_merge_request_requires_two_sources() {
        assert!(request(vec![1], vec![]).validate().is_err());
        assert!(request(vec![1, 2], vec![]).validate().is_ok());
    }

    #[test]
    fn test_merge_request_rejects_duplicates_and_negative_offsets() {
        assert!(request(vec![1, 1], vec![]).validate().is_err());
        assert!(request(vec![1, 2], vec![(2, -5)]).validate().is_err());
    }

    #[test]
    fn test_merge_request_rejects_offsets_beyond_a_day() {
        assert!(request(vec![1, 2], vec![(2, MAX_OFFSET_MS)]).validate().is_ok());
        assert!(request(vec![1, 2], vec![(2, MAX_OFFSET_MS + 1)]).validate().is_err());
        assert!(request(vec![1, 2], vec![(2, i64::MAX)]).validate().is_err());
    }

    #[test]
    fn test_offsets_must_reference_listed_sources() {
        assert!(request(vec![1, 2], vec![(3, 10)]).validate_offsets().is_err());
        assert!(request(vec![1, 2], vec![(2, 10), (2, 20)]).validate_offsets().is_err());
        assert!(request(vec![1, 2], vec![(2, 10)]).validate_offsets().is_ok());
    }

    #[test]
    fn test_missing_offset_defaults_to_zero() {
        let req = request(vec![1, 2], vec![(2, 750)]);
        assert_eq!(req.offset_for(1), 0);
        assert_eq!(req.offset_for(2), 750);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let json = r#"{"recordIds":[1,2],"deviceId":3,"mergeEverything":true}"#;
        assert!(serde_json::from_str::<MergeRecordsRequest>(json).is_err());

        let json = r#"{"recordIds":[1,2],"timeOffsets":[{"recordId":2,"offset":100}],"competitionId":null,"deviceId":3}"#;
        let req: MergeRecordsRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.offset_for(2), 100);
    }

    #[test]
    fn test_toggle_requires_boolean() {
        assert!(serde_json::from_str::<ToggleRecordRequest>(r#"{"disabled":"yes"}"#).is_err());
        assert!(serde_json::from_str::<ToggleRecordRequest>(r#"{"disabled":true}"#).is_ok());
    }

    #[test]
    fn test_fragment_rejects_negative_timestamps() {
        let fragment = CreateFragmentRequest {
            device_id: 1,
            race_id: None,
            competition_id: None,
            stop_time: None,
            samples: vec![NewSample {
                session_id: 1,
                timestamp: -1,
                voltage: None,
                current: None,
                energy: None,
            }],
        };
        assert!(fragment.validate().is_err());
    }

    #[test]
    fn test_batch_update_validation() {
        let update = |record_id, sort_order, time_offset| RecordOrderUpdate {
            record_id,
            sort_order,
            time_offset,
        };

        let ok = BatchUpdateRecordsRequest {
            updates: vec![update(1, Some(0), None), update(2, None, Some(1500))],
        };
        assert!(ok.validate().is_ok());
        assert_eq!(ok.record_ids(), vec![1, 2]);

        let empty = BatchUpdateRecordsRequest { updates: vec![] };
        assert!(empty.validate().is_err());

        let duplicated = BatchUpdateRecordsRequest {
            updates: vec![update(1, Some(0), None), update(1, Some(1), None)],
        };
        assert!(duplicated.validate().is_err());

        let negative = BatchUpdateRecordsRequest {
            updates: vec![update(1, Some(-1), None)],
        };
        assert!(negative.validate().is_err());

        let too_far = BatchUpdateRecordsRequest {
            updates: vec![update(1, None, Some(i64::MAX))],
        };
        assert!(too_far.validate().is_err());
    }

    #[test]
    fn test_record_filter_query_flags() {
        let json = r#"{"teamId":4,"unassigned":true}"#;
        let filter: RecordFilter = serde_json::from_str(json).unwrap();
        assert_eq!(filter.team_id, Some(4));
        assert!(filter.unassigned);
        assert!(!filter.include_disabled);
    }

    #[test]
    fn test_fragment_rejects_timestamps_out_of_range() {
        let mut fragment = CreateFragmentRequest {
            device_id: 1,
            race_id: None,
            competition_id: None,
            stop_time: None,
            samples: vec![NewSample {
                session_id: 1,
                timestamp: MAX_TIMESTAMP_MS,
                voltage: None,
                current: None,
                energy: None,
            }],
        };
        assert!(fragment.validate().is_ok());

        fragment.samples[0].timestamp = i64::MAX;
        assert!(fragment.validate().is_err());
    }
}
