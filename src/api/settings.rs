use axum::{extract::State, Json};
use std::sync::Arc;

use crate::db::{AlertSettings, UpdateAlertSettingsRequest};
use crate::AppState;

use super::error::ValidationErrorBuilder;
use super::{ApiError, ShopDomain};

fn validate_settings(req: &UpdateAlertSettingsRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    match req.conversion_rate_threshold {
        Some(t) if !t.is_finite() || !(0.0..=100.0).contains(&t) => {
            errors.add("conversionRateThreshold", "Must be between 0 and 100");
        }
        None if req.conversion_rate_low => {
            errors.add(
                "conversionRateThreshold",
                "Required when the conversion rate alert is enabled",
            );
        }
        _ => {}
    }

    if let Some(email) = req.alert_email.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if email.parse::<lettre::Address>().is_err() {
            errors.add("alertEmail", "Invalid email address");
        }
    }

    let slack_url = req
        .slack_webhook_url
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match slack_url {
        Some(url) if !url.starts_with("https://") => {
            errors.add("slackWebhookUrl", "Must be an https URL");
        }
        None if req.slack_enabled => {
            errors.add("slackWebhookUrl", "Required when Slack notifications are enabled");
        }
        _ => {}
    }

    errors.finish()
}

/// Settings for the shop, created with every alert disabled on first access
///
/// GET /api/settings
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    ShopDomain(shop): ShopDomain,
) -> Result<Json<AlertSettings>, ApiError> {
    Ok(Json(AlertSettings::get_or_create(&state.db, &shop).await?))
}

/// PUT /api/settings
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    ShopDomain(shop): ShopDomain,
    Json(req): Json<UpdateAlertSettingsRequest>,
) -> Result<Json<AlertSettings>, ApiError> {
    validate_settings(&req)?;

    let settings = AlertSettings::upsert(&state.db, &shop, &req).await?;
    tracing::info!(shop = %shop, enabled = ?settings.enabled_kinds(), "Alert settings updated");

    Ok(Json(settings))
}
