use storage::{
    dto::record::{
        AssignRecordRequest, BatchUpdateRecordsRequest, CreateFragmentRequest,
        MergePreviewResponse, MergeRecordsRequest, RecordFilter, RecordResponse,
    },
    error::Result,
    models::{Record, Sample},
    services::TelemetryEngine,
};

/// List records matching the filter
pub async fn list_records(engine: &TelemetryEngine, filter: &RecordFilter) -> Result<Vec<RecordResponse>> {
    engine.list_records(filter).await
}

/// Get a record with its sample count
pub async fn get_record(engine: &TelemetryEngine, record_id: i32) -> Result<RecordResponse> {
    engine.find_record(record_id).await
}

/// Get the samples a record owns, in timeline order
pub async fn list_samples(engine: &TelemetryEngine, record_id: i32) -> Result<Vec<Sample>> {
    engine.record_samples(record_id).await
}

/// Store an uploaded fragment
pub async fn upload_fragment(
    engine: &TelemetryEngine,
    req: &CreateFragmentRequest,
) -> Result<RecordResponse> {
    engine.ingest_fragment(req).await
}

/// Merge fragments into a canonical record
pub async fn merge_records(
    engine: &TelemetryEngine,
    req: &MergeRecordsRequest,
) -> Result<RecordResponse> {
    engine.reconcile(req).await
}

/// Compute a merge without committing it
pub async fn preview_merge(
    engine: &TelemetryEngine,
    req: &MergeRecordsRequest,
) -> Result<MergePreviewResponse> {
    engine.preview_merge(req).await
}

pub async fn recompute_aggregates(engine: &TelemetryEngine, record_id: i32) -> Result<Record> {
    engine.recompute_aggregates(record_id).await
}

pub async fn set_disabled(
    engine: &TelemetryEngine,
    record_id: i32,
    disabled: bool,
) -> Result<RecordResponse> {
    engine.set_record_disabled(record_id, disabled).await
}

pub async fn batch_update(
    engine: &TelemetryEngine,
    req: &BatchUpdateRecordsRequest,
) -> Result<Vec<RecordResponse>> {
    engine.update_record_order(req).await
}

pub async fn assign_record(
    engine: &TelemetryEngine,
    record_id: i32,
    req: &AssignRecordRequest,
) -> Result<RecordResponse> {
    engine.assign_record(record_id, req).await
}
