// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::Request,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    dispatch::{DispatchOutcome, LedgerOutcome, RelayDispatch},
    error::ErrorBody,
    identity::Attestation,
    ledger::{Attribute, LedgerEntity},
    models::{DeviceRecord, Location, RecordDraft, StorageInfo},
    relay::RelayOutcome,
    state::AppState,
    store::{DispatchStatus, Route, StoredRecord},
};

pub mod health;
pub mod identity;
pub mod ledger;
pub mod records;

pub fn router(state: AppState) -> Router {
    let upload_limit = state.upload.max_upload_bytes;

    let v1_routes = Router::new()
        .route(
            "/records",
            get(records::list_records).post(records::submit_record),
        )
        .route(
            "/records/upload",
            post(records::submit_record_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/records/anonymous", get(records::list_anonymous_records))
        .route("/verify", post(identity::verify))
        .route("/identity/custodial", post(identity::custodial_address))
        .route("/ledger/entities/{entity_key}", get(ledger::get_entity))
        .route(
            "/ledger/devices/{device_pub}/entities",
            get(ledger::device_entities),
        );

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        }))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        records::submit_record,
        records::submit_record_upload,
        records::list_records,
        records::list_anonymous_records,
        identity::verify,
        identity::custodial_address,
        ledger::get_entity,
        ledger::device_entities
    ),
    components(
        schemas(
            Attestation,
            RecordDraft,
            DeviceRecord,
            Location,
            StorageInfo,
            StoredRecord,
            Route,
            DispatchStatus,
            DispatchOutcome,
            LedgerOutcome,
            RelayDispatch,
            RelayOutcome,
            LedgerEntity,
            Attribute,
            ErrorBody,
            records::SubmitRecordRequest,
            records::SubmitRecordUpload,
            records::SubmitResponse,
            records::RecordList,
            identity::VerifyResponse,
            identity::CustodialResponse,
            ledger::EntityView,
            ledger::EntityList,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Records", description = "Device record submission and the record log"),
        (name = "Identity", description = "Attestation verification and custodial wallets"),
        (name = "Ledger", description = "Published entity lookups"),
        (name = "Health", description = "Liveness and readiness")
    )
)]
struct ApiDoc;
