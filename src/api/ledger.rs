// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read-only ledger lookups.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::{
    error::{ApiError, ErrorBody},
    ledger::{LedgerEntity, LedgerError, Predicate, DEVICE_RECORD_TYPE, TYPE_ATTRIBUTE},
    state::AppState,
};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityView {
    #[serde(flatten)]
    pub entity: LedgerEntity,
    /// Payload decoded as JSON, when it is JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub record: Option<serde_json::Value>,
}

impl From<LedgerEntity> for EntityView {
    fn from(entity: LedgerEntity) -> Self {
        let record = entity.payload_json();
        Self { entity, record }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EntityList {
    pub count: usize,
    pub entities: Vec<EntityView>,
}

fn upstream(e: LedgerError) -> ApiError {
    warn!(error = %e, "Ledger read failed");
    ApiError::bad_gateway(e.to_string())
}

#[utoipa::path(
    get,
    path = "/v1/ledger/entities/{entity_key}",
    params(("entity_key" = String, Path, description = "Entity key returned at publish time")),
    tag = "Ledger",
    responses(
        (status = 200, body = EntityView),
        (status = 404, body = ErrorBody),
        (status = 502, description = "Ledger unavailable", body = ErrorBody)
    )
)]
pub async fn get_entity(
    State(state): State<AppState>,
    Path(entity_key): Path<String>,
) -> Result<Json<EntityView>, ApiError> {
    let entity = state
        .ledger
        .get_entity(&entity_key)
        .await
        .map_err(upstream)?
        .ok_or_else(|| ApiError::not_found(format!("Entity {entity_key} not found")))?;
    Ok(Json(entity.into()))
}

#[utoipa::path(
    get,
    path = "/v1/ledger/devices/{device_pub}/entities",
    params(("device_pub" = String, Path, description = "Device public identifier")),
    tag = "Ledger",
    responses(
        (status = 200, body = EntityList),
        (status = 502, description = "Ledger unavailable", body = ErrorBody)
    )
)]
pub async fn device_entities(
    State(state): State<AppState>,
    Path(device_pub): Path<String>,
) -> Result<Json<EntityList>, ApiError> {
    let entities = state
        .ledger
        .query(&device_predicates(&device_pub))
        .await
        .map_err(upstream)?;

    let entities: Vec<EntityView> = entities.into_iter().map(Into::into).collect();
    Ok(Json(EntityList {
        count: entities.len(),
        entities,
    }))
}

fn device_predicates(device_pub: &str) -> [Predicate; 2] {
    [
        Predicate::eq(TYPE_ATTRIBUTE, DEVICE_RECORD_TYPE),
        Predicate::eq("devicePub", device_pub),
    ]
}
