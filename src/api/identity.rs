// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Attestation verification and custodial address lookup.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    dispatch::DispatchError,
    error::{ApiError, ErrorBody},
    identity::Attestation,
    state::AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    /// Checksummed address that signed the message.
    pub address: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustodialResponse {
    pub device_address: String,
    /// Wallet that signs this device's ledger entities and must hold gas.
    pub custodial_address: String,
}

#[utoipa::path(
    post,
    path = "/v1/verify",
    request_body = Attestation,
    tag = "Identity",
    responses(
        (status = 200, body = VerifyResponse),
        (status = 400, body = ErrorBody),
        (status = 401, description = "Signature rejected", body = ErrorBody)
    )
)]
pub async fn verify(
    payload: Result<Json<Attestation>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Json(attestation) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let address = attestation.verify().map_err(DispatchError::from)?;
    Ok(Json(VerifyResponse {
        address: address.to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/identity/custodial",
    request_body = Attestation,
    tag = "Identity",
    responses(
        (status = 200, body = CustodialResponse),
        (status = 400, body = ErrorBody),
        (status = 401, description = "Signature rejected", body = ErrorBody),
        (status = 500, description = "Server salt not configured", body = ErrorBody)
    )
)]
pub async fn custodial_address(
    State(state): State<AppState>,
    payload: Result<Json<Attestation>, JsonRejection>,
) -> Result<Json<CustodialResponse>, ApiError> {
    let Json(attestation) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let identity = state.dispatcher.identity_for(&attestation).await?;
    Ok(Json(CustodialResponse {
        device_address: identity.device_address,
        custodial_address: identity.custodial_address.to_string(),
    }))
}
