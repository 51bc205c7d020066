use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{Result, StorageError};
use crate::models::Sample;

/// Minimum separation between the last sample of one fragment and the first
/// sample of the next one on a canonical timeline.
pub const GUARD_GAP_MS: i64 = 1000;

/// Largest accepted sample timestamp, 9999-12-31T23:59:59.999Z in epoch ms.
pub const MAX_TIMESTAMP_MS: i64 = 253_402_300_799_999;

/// Largest caller-supplied offset for one merge source: one day.
pub const MAX_OFFSET_MS: i64 = 86_400_000;

/// One fragment to fold into a canonical timeline.
#[derive(Debug, Clone, Copy)]
pub struct MergeSource<'a> {
    pub record_id: i32,
    /// Caller-supplied extra shift, never negative.
    pub offset_ms: i64,
    pub samples: &'a [Sample],
}

/// Where a source ended up on the canonical timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpan {
    pub record_id: i32,
    pub offset_ms: i64,
    /// Shift applied on top of the caller offset to keep the guard gap.
    pub global_offset_ms: i64,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MergedSeries {
    /// Re-timestamped samples in source order; `record_id` still points at
    /// the source record until the merge is committed.
    pub samples: Vec<Sample>,
    pub spans: Vec<SourceSpan>,
}

impl MergedSeries {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.spans.iter().find_map(|span| span.first_timestamp)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.spans.iter().rev().find_map(|span| span.last_timestamp)
    }
}

/// Concatenates fragments in the given order.
///
/// Each sample keeps its position relative to the other samples of its
/// fragment. A fragment is shifted by `global_offset + offset_ms`, where the
/// global offset is the smallest non-negative shift that places its first
/// sample at least `guard_gap_ms` after the last sample already folded. Empty
/// fragments are recorded in `spans` but do not move the timeline.
///
/// Fails with a validation error when a shifted timestamp would not fit in
/// an `i64`.
pub fn merge(sources: &[MergeSource<'_>], guard_gap_ms: i64) -> Result<MergedSeries> {
    let total = sources.iter().map(|s| s.samples.len()).sum();
    let mut merged = MergedSeries {
        samples: Vec::with_capacity(total),
        spans: Vec::with_capacity(sources.len()),
    };

    // Earliest timestamp the next fragment may start at.
    let mut next_start: Option<i64> = None;

    for source in sources {
        let mut samples = source.samples.to_vec();
        samples.sort_by_key(|s| (s.timestamp, s.sample_id));

        let Some(first_raw) = samples.first().map(|s| s.timestamp) else {
            tracing::debug!(record_id = source.record_id, "skipping empty fragment");
            merged.spans.push(SourceSpan {
                record_id: source.record_id,
                offset_ms: source.offset_ms,
                global_offset_ms: 0,
                first_timestamp: None,
                last_timestamp: None,
                sample_count: 0,
            });
            continue;
        };

        let global_offset = match next_start {
            Some(start) => start
                .checked_sub(first_raw)
                .ok_or_else(|| overflow(source.record_id))?
                .max(0),
            None => 0,
        };
        let shift = global_offset
            .checked_add(source.offset_ms)
            .ok_or_else(|| overflow(source.record_id))?;

        for sample in &mut samples {
            sample.timestamp = sample
                .timestamp
                .checked_add(shift)
                .ok_or_else(|| overflow(source.record_id))?;
        }

        let first = samples.first().map_or(first_raw, |s| s.timestamp);
        let last = samples.last().map_or(first, |s| s.timestamp);
        let after = last
            .checked_add(guard_gap_ms)
            .ok_or_else(|| overflow(source.record_id))?;
        next_start = Some(after);

        tracing::debug!(
            record_id = source.record_id,
            global_offset,
            offset = source.offset_ms,
            first,
            last,
            "folded fragment"
        );

        merged.spans.push(SourceSpan {
            record_id: source.record_id,
            offset_ms: source.offset_ms,
            global_offset_ms: global_offset,
            first_timestamp: Some(first),
            last_timestamp: Some(last),
            sample_count: samples.len(),
        });
        merged.samples.extend(samples);
    }

    Ok(merged)
}

fn overflow(record_id: i32) -> StorageError {
    StorageError::Validation(format!(
        "record {record_id} cannot be placed on the merged timeline: timestamp out of range"
    ))
}
