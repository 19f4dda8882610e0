use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::engine::{run_sweep, SweepSummary};
use crate::AppState;

use super::ApiError;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Whether the request carries the configured token. Open when none is configured.
fn is_authorized(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected else {
        return true;
    };

    match bearer_token(headers) {
        Some(provided) => {
            provided.len() == expected.len()
                && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
        }
        None => false,
    }
}

/// Run the alert sweep for all shops on demand
///
/// GET /api/cron/alerts
pub async fn run_cron_alerts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SweepSummary>, ApiError> {
    if !is_authorized(state.config.alerts.cron_token.as_deref(), &headers) {
        tracing::warn!("Rejected alert sweep request with invalid token");
        return Err(ApiError::unauthorized("Invalid cron token"));
    }

    let summary = run_sweep(&state.dispatcher, &state.db).await?;
    Ok(Json(summary))
}
