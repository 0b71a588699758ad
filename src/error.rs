// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::dispatch::DispatchError;

/// Shown with 402 responses.
pub const FUNDING_HINT: &str =
    "Fund the custodial wallet with enough native token to cover gas, then resubmit the record.";

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub wallet_address: Option<String>,
    pub hint: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    wallet_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            wallet_address: None,
            hint: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn payment_required(wallet_address: impl Into<String>) -> Self {
        let wallet_address = wallet_address.into();
        Self {
            wallet_address: Some(wallet_address.clone()),
            hint: Some(FUNDING_HINT.to_string()),
            ..Self::new(
                StatusCode::PAYMENT_REQUIRED,
                format!("Insufficient funds in custodial wallet {wallet_address}"),
            )
        }
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e.wallet_address() {
            Some(wallet) => Self::payment_required(wallet),
            None => Self::new(e.status_code(), e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            wallet_address: self.wallet_address,
            hint: self.hint,
        });
        (self.status, body).into_response()
    }
}
