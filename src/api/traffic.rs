use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{CheckoutSession, PixelEvent, TrafficEvent};
use crate::AppState;

use super::{parse_shop_domain, ApiError};

/// Pageview posted by the storefront tracking script
#[derive(Debug, Deserialize)]
pub struct TrackTrafficRequest {
    pub shop: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrackTrafficResponse {
    pub success: bool,
}

/// Record one storefront pageview
///
/// POST /api/track-traffic
pub async fn track_traffic(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TrackTrafficRequest>,
) -> Result<Json<TrackTrafficResponse>, ApiError> {
    let raw = req
        .shop
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing shop"))?;
    let shop = parse_shop_domain(raw).ok_or_else(|| ApiError::bad_request("Invalid shop"))?;

    let event_date = req.timestamp.unwrap_or_else(Utc::now);
    TrafficEvent::create(&state.db, &shop, event_date, req.url.as_deref().unwrap_or("")).await?;

    tracing::trace!(shop = %shop, "Traffic event recorded");
    Ok(Json(TrackTrafficResponse { success: true }))
}

/// Event forwarded by the web pixel
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelPayloadRequest {
    pub shop: Option<String>,
    pub session_id: Option<String>,
    pub event_name: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Fold one web pixel event into its checkout session
///
/// POST /api/pixel-payload
pub async fn pixel_payload(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PixelPayloadRequest>,
) -> Result<Json<TrackTrafficResponse>, ApiError> {
    let (Some(raw), Some(session_id), Some(event_name)) = (
        non_empty(&req.shop),
        non_empty(&req.session_id),
        non_empty(&req.event_name),
    ) else {
        return Err(ApiError::bad_request(
            "Missing shop, sessionId, or eventName",
        ));
    };

    // The pixel reports the storefront origin
    let host = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .unwrap_or(raw)
        .trim_end_matches('/');
    let shop = parse_shop_domain(host).ok_or_else(|| ApiError::bad_request("Invalid shop"))?;

    let event = PixelEvent::from_name(event_name);
    CheckoutSession::record_event(&state.db, &shop, session_id, event, Utc::now()).await?;

    tracing::trace!(shop = %shop, event = %event_name, "Pixel event recorded");
    Ok(Json(TrackTrafficResponse { success: true }))
}
