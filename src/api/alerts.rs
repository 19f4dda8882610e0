//! Alert evaluation endpoints.
//!
//! All routes act on the shop from the `X-Shopify-Shop-Domain` header.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::AlertKind;
use crate::engine::{AlertError, CheckAllResult};
use crate::notifications::DeliveryReport;
use crate::AppState;

use super::{ApiError, ShopDomain};

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub report: DeliveryReport,
}

#[derive(Debug, Deserialize)]
pub struct SetFlagRequest {
    pub value: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagResponse {
    pub kind: AlertKind,
    pub value: bool,
}

#[derive(Debug, Serialize)]
pub struct ResetFlagsResponse {
    pub success: bool,
    pub message: String,
}

/// Evaluate every alert kind for the shop
///
/// GET|POST /api/alerts/check
pub async fn check_alerts(
    State(state): State<Arc<AppState>>,
    ShopDomain(shop): ShopDomain,
) -> Json<CheckAllResult> {
    Json(state.dispatcher.check_all(&shop).await)
}

/// Clear all notified flags
///
/// POST /api/alerts/reset-flags
pub async fn reset_flags(
    State(state): State<Arc<AppState>>,
    ShopDomain(shop): ShopDomain,
) -> Result<Json<ResetFlagsResponse>, ApiError> {
    state.dispatcher.reset_flags(&shop).await?;

    Ok(Json(ResetFlagsResponse {
        success: true,
        message: "Alert flags reset".to_string(),
    }))
}

/// Send one notification kind without evaluating metrics
///
/// POST /api/alerts/trigger
pub async fn trigger_alert(
    State(state): State<Arc<AppState>>,
    ShopDomain(shop): ShopDomain,
    Json(req): Json<TriggerRequest>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let report = state.dispatcher.trigger(&shop, &req.kind).await?;

    Ok(Json(TriggerResponse {
        kind: req.kind,
        report,
    }))
}

/// Send the email delivery test
///
/// GET|POST /api/alerts/test-email
pub async fn test_email(
    State(state): State<Arc<AppState>>,
    ShopDomain(shop): ShopDomain,
) -> Result<Json<TriggerResponse>, ApiError> {
    let report = state.dispatcher.test_email(&shop).await?;

    Ok(Json(TriggerResponse {
        kind: "emailTest".to_string(),
        report,
    }))
}

/// Override one notified flag
///
/// PUT /api/alerts/flags/:kind
pub async fn set_flag(
    State(state): State<Arc<AppState>>,
    ShopDomain(shop): ShopDomain,
    Path(kind): Path<String>,
    Json(req): Json<SetFlagRequest>,
) -> Result<Json<FlagResponse>, ApiError> {
    let kind = AlertKind::from_key(&kind).ok_or(AlertError::UnknownKind(kind))?;
    state.dispatcher.set_flag(&shop, kind, req.value).await?;

    Ok(Json(FlagResponse {
        kind,
        value: req.value,
    }))
}
