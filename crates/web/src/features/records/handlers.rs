use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use storage::{
    dto::record::{
        AssignRecordRequest, BatchUpdateRecordsRequest, CreateFragmentRequest,
        MergePreviewResponse, MergeRecordsRequest, RecomputeAggregatesRequest, RecordFilter,
        RecordResponse, ToggleRecordRequest,
    },
    models::{Record, Sample},
};
use validator::Validate;

use crate::error::WebError;
use crate::state::AppState;

use super::services;

#[utoipa::path(
    get,
    path = "/api/records",
    params(RecordFilter),
    responses(
        (status = 200, description = "Records matching the filter", body = Vec<RecordResponse>)
    ),
    tag = "records"
)]
pub async fn list_records(
    State(state): State<AppState>,
    Query(filter): Query<RecordFilter>,
) -> Result<Response, WebError> {
    let records = services::list_records(&state.engine, &filter).await?;

    Ok(Json(records).into_response())
}

#[utoipa::path(
    get,
    path = "/api/records/{id}",
    params(
        ("id" = i32, Path, description = "Record ID")
    ),
    responses(
        (status = 200, description = "Record found", body = RecordResponse),
        (status = 404, description = "Record not found")
    ),
    tag = "records"
)]
pub async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response, WebError> {
    let record = services::get_record(&state.engine, id).await?;

    Ok(Json(record).into_response())
}

#[utoipa::path(
    get,
    path = "/api/records/{id}/samples",
    params(
        ("id" = i32, Path, description = "Record ID")
    ),
    responses(
        (status = 200, description = "Samples in timeline order", body = Vec<Sample>),
        (status = 404, description = "Record not found")
    ),
    tag = "records"
)]
pub async fn list_samples(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response, WebError> {
    let samples = services::list_samples(&state.engine, id).await?;

    Ok(Json(samples).into_response())
}

#[utoipa::path(
    post,
    path = "/api/records",
    request_body = CreateFragmentRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 201, description = "Fragment stored", body = RecordResponse),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Device, race or competition not found"),
        (status = 409, description = "Race already completed")
    ),
    tag = "records"
)]
pub async fn upload_fragment(
    State(state): State<AppState>,
    Json(req): Json<CreateFragmentRequest>,
) -> Result<Response, WebError> {
    req.validate()?;

    let record = services::upload_fragment(&state.engine, &req).await?;

    Ok((StatusCode::CREATED, Json(record)).into_response())
}

#[utoipa::path(
    post,
    path = "/api/records/merge",
    request_body = MergeRecordsRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 201, description = "Canonical record created", body = RecordResponse),
        (status = 400, description = "Fewer than two sources or invalid offsets"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Source record or device not found"),
        (status = 409, description = "A source is disabled or already merged")
    ),
    tag = "records"
)]
pub async fn merge_records(
    State(state): State<AppState>,
    Json(req): Json<MergeRecordsRequest>,
) -> Result<Response, WebError> {
    req.validate()?;

    let record = services::merge_records(&state.engine, &req).await?;

    Ok((StatusCode::CREATED, Json(record)).into_response())
}

#[utoipa::path(
    post,
    path = "/api/records/merge/preview",
    request_body = MergeRecordsRequest,
    responses(
        (status = 200, description = "Merged timeline summary", body = MergePreviewResponse),
        (status = 400, description = "Fewer than two sources or invalid offsets"),
        (status = 404, description = "Source record or device not found"),
        (status = 409, description = "A source is disabled or already merged")
    ),
    tag = "records"
)]
pub async fn preview_merge(
    State(state): State<AppState>,
    Json(req): Json<MergeRecordsRequest>,
) -> Result<Response, WebError> {
    req.validate()?;

    let preview = services::preview_merge(&state.engine, &req).await?;

    Ok(Json(preview).into_response())
}

#[utoipa::path(
    post,
    path = "/api/records/aggregates",
    request_body = RecomputeAggregatesRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Aggregates recomputed", body = Record),
        (status = 400, description = "Record has no sample data"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Record not found")
    ),
    tag = "records"
)]
pub async fn recompute_aggregates(
    State(state): State<AppState>,
    Json(req): Json<RecomputeAggregatesRequest>,
) -> Result<Response, WebError> {
    let record = services::recompute_aggregates(&state.engine, req.record_id).await?;

    Ok(Json(record).into_response())
}

#[utoipa::path(
    put,
    path = "/api/records/{id}/disabled",
    params(
        ("id" = i32, Path, description = "Record ID")
    ),
    request_body = ToggleRecordRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Record updated", body = RecordResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Record was consumed by a merge")
    ),
    tag = "records"
)]
pub async fn set_disabled(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(req): Json<ToggleRecordRequest>,
) -> Result<Response, WebError> {
    let record = services::set_disabled(&state.engine, id, req.disabled).await?;

    Ok(Json(record).into_response())
}

#[utoipa::path(
    put,
    path = "/api/records/{id}/assignment",
    params(
        ("id" = i32, Path, description = "Record ID")
    ),
    request_body = AssignRecordRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Record reassigned", body = RecordResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Record, race or competition not found"),
        (status = 409, description = "Race already completed")
    ),
    tag = "records"
)]
pub async fn assign_record(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(req): Json<AssignRecordRequest>,
) -> Result<Response, WebError> {
    let record = services::assign_record(&state.engine, id, &req).await?;

    Ok(Json(record).into_response())
}

#[utoipa::path(
    post,
    path = "/api/records/batch-update",
    request_body = BatchUpdateRecordsRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Records updated", body = Vec<RecordResponse>),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Record was consumed by a merge")
    ),
    tag = "records"
)]
pub async fn batch_update(
    State(state): State<AppState>,
    Json(req): Json<BatchUpdateRecordsRequest>,
) -> Result<Response, WebError> {
    req.validate()?;

    let records = services::batch_update(&state.engine, &req).await?;

    Ok(Json(records).into_response())
}
