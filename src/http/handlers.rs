//! HTTP handlers for the check, reset and health endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn, Span};

use crate::error::CustomsError;
use crate::policy::{CheckRequest, Decision, DecisionEngine};

/// Shared application state.
pub struct AppState {
    pub engine: Arc<DecisionEngine>,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

impl IntoResponse for CustomsError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            CustomsError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "InvalidRequest"),
            CustomsError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "StoreUnavailable")
            }
            CustomsError::Config(_) | CustomsError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
            }
        };

        let body = ErrorResponse {
            code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "customs",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Decide whether an attempted action should be blocked.
///
/// Blocked and allowed attempts both answer 200; the outcome is in the body.
/// Only a request that cannot be evaluated gets an error status.
#[instrument(skip_all, fields(ip = tracing::field::Empty, action = tracing::field::Empty))]
pub async fn check(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Json<Decision>, CustomsError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected malformed check request");
        CustomsError::InvalidRequest(rejection.body_text())
    })?;

    let span = Span::current();
    span.record("ip", request.ip.as_str());
    span.record("action", request.action.as_str());

    debug!(email = %request.email, "Processing check request");

    match state.engine.evaluate(&request).await {
        Ok(decision) => Ok(Json(decision)),
        Err(e @ CustomsError::InvalidRequest(_)) => {
            warn!(error = %e, "Rejected invalid check request");
            Err(e)
        }
        Err(e) => {
            error!(error = %e, "Check could not be evaluated");
            Err(e)
        }
    }
}

/// Clear every counter, set and ban.
pub async fn reset(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, CustomsError> {
    state.engine.reset().await?;
    info!("State reset through admin endpoint");
    Ok(Json(serde_json::json!({})))
}
