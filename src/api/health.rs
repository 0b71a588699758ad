// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    /// Individual health checks and their results.
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Server salt for custodial derivation ("ok" or "missing").
    pub server_salt: String,
    /// Pinning credentials ("ok" or "disabled"). Optional for readiness.
    pub pinning: String,
    /// Relay command ("ok" or "missing").
    pub relay: String,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

fn flag(ok: bool, otherwise: &str) -> String {
    if ok { "ok" } else { otherwise }.to_string()
}

/// Health check endpoint handler.
///
/// Returns 200 when the ledger path can derive keys and a relay command is
/// set, 503 otherwise. Missing pinning credentials only disable uploads.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let salt_ok = state.dispatcher.has_salt();
    let relay_ok = !state.relay_command.trim().is_empty();
    let all_ok = salt_ok && relay_ok;

    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            server_salt: flag(salt_ok, "missing"),
            pinning: flag(state.dispatcher.has_pinning(), "disabled"),
            relay: flag(relay_ok, "missing"),
        },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(state: State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    health(state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let Json(body) = liveness().await;
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn readiness_degrades_without_salt() {
        let state = AppState::from_config(&AppConfig::default()).unwrap();
        let (status, Json(body)) = readiness(State(state)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.checks.server_salt, "missing");
        assert_eq!(body.checks.pinning, "disabled");
        assert_eq!(body.checks.relay, "ok");
    }

    #[tokio::test]
    async fn ready_with_salt() {
        let config = AppConfig {
            server_salt: Some(b"health-check-salt-0123".to_vec()),
            ..AppConfig::default()
        };
        let state = AppState::from_config(&config).unwrap();
        let (status, Json(body)) = health(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
    }
}
