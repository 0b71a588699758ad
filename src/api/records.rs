// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Record submission and log listing.

use axum::{
    extract::{multipart::Field, rejection::JsonRejection, Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::{
    dispatch::{DispatchOutcome, SubmitRecord},
    error::{ApiError, ErrorBody},
    models::RecordDraft,
    state::AppState,
    store::StoredRecord,
    upload::UploadedFile,
};

/// JSON submission body.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRecordRequest {
    pub record: RecordDraft,
    /// Message the device signed.
    #[serde(default)]
    pub message: Option<String>,
    /// Hex-encoded 65-byte signature over `message`.
    #[serde(default)]
    pub signature: Option<String>,
    /// Route through the anonymous relay instead of the ledger.
    #[serde(default)]
    pub whistleblow: bool,
    /// Development builds only.
    #[serde(default)]
    pub bypass_signature: bool,
}

impl From<SubmitRecordRequest> for SubmitRecord {
    fn from(request: SubmitRecordRequest) -> Self {
        Self {
            record: request.record,
            message: request.message,
            signature: request.signature,
            whistleblow: request.whistleblow,
            bypass_signature: request.bypass_signature,
            file: None,
        }
    }
}

/// Multipart submission body, for the OpenAPI document.
#[allow(dead_code)]
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRecordUpload {
    /// JSON-encoded record.
    pub record: String,
    pub message: Option<String>,
    pub signature: Option<String>,
    pub whistleblow: Option<bool>,
    pub bypass_signature: Option<bool>,
    #[schema(format = Binary, value_type = Option<String>)]
    pub file: Option<Vec<u8>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponse {
    pub success: bool,
    pub data: DispatchOutcome,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecordList {
    pub count: usize,
    pub records: Vec<StoredRecord>,
}

#[utoipa::path(
    post,
    path = "/v1/records",
    request_body = SubmitRecordRequest,
    tag = "Records",
    responses(
        (status = 200, body = SubmitResponse),
        (status = 400, description = "Malformed record or missing signature", body = ErrorBody),
        (status = 401, description = "Signature rejected", body = ErrorBody),
        (status = 402, description = "Custodial wallet needs funding", body = ErrorBody),
        (status = 500, description = "Backend failure", body = ErrorBody)
    )
)]
pub async fn submit_record(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRecordRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let data = state.dispatcher.submit(request.into()).await?;
    Ok(Json(SubmitResponse {
        success: true,
        data,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/records/upload",
    request_body(content = SubmitRecordUpload, content_type = "multipart/form-data"),
    tag = "Records",
    responses(
        (status = 200, body = SubmitResponse),
        (status = 400, description = "Malformed record or missing signature", body = ErrorBody),
        (status = 401, description = "Signature rejected", body = ErrorBody),
        (status = 402, description = "Custodial wallet needs funding", body = ErrorBody),
        (status = 500, description = "Backend failure", body = ErrorBody)
    )
)]
pub async fn submit_record_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let request = read_submission(&state, multipart).await?;
    let data = state.dispatcher.submit(request).await?;
    Ok(Json(SubmitResponse {
        success: true,
        data,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/records",
    tag = "Records",
    responses((status = 200, body = RecordList))
)]
pub async fn list_records(State(state): State<AppState>) -> Json<RecordList> {
    let records = state.records().list().await;
    Json(RecordList {
        count: records.len(),
        records,
    })
}

#[utoipa::path(
    get,
    path = "/v1/records/anonymous",
    tag = "Records",
    responses((status = 200, body = RecordList))
)]
pub async fn list_anonymous_records(State(state): State<AppState>) -> Json<RecordList> {
    let records = state.records().list_anonymous().await;
    Json(RecordList {
        count: records.len(),
        records,
    })
}

async fn read_submission(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<SubmitRecord, ApiError> {
    let mut record = None;
    let mut request = SubmitRecord::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "record" => {
                let raw = text(field).await?;
                let draft: RecordDraft = serde_json::from_str(&raw)
                    .map_err(|e| ApiError::bad_request(format!("invalid `record` field: {e}")))?;
                record = Some(draft);
            }
            "message" => request.message = Some(text(field).await?),
            "signature" => request.signature = Some(text(field).await?),
            "whistleblow" => request.whistleblow = parse_flag(&text(field).await?),
            "bypassSignature" => request.bypass_signature = parse_flag(&text(field).await?),
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                if bytes.is_empty() {
                    continue;
                }
                let spool_dir = state.upload.spool_dir.clone();
                let spooled = tokio::task::spawn_blocking(move || {
                    UploadedFile::spool(&bytes, file_name, content_type, spool_dir.as_deref())
                })
                .await
                .map_err(|e| ApiError::internal(format!("spool task failed: {e}")))?
                .map_err(|e| ApiError::internal(format!("failed to spool upload: {e}")))?;
                request.file = Some(spooled);
            }
            other => debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    request.record =
        record.ok_or_else(|| ApiError::bad_request("missing `record` field"))?;
    Ok(request)
}

async fn text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

/// Form booleans: `true`, `1`, `yes` and `on` are set, anything else is not.
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
