//! Per-shop alert settings and the notified flags.
//!
//! One row per shop holds which alert kinds the merchant enabled, the
//! conversion-rate threshold, the notification channel configuration, and one
//! notified flag per alert kind. Rows are created lazily with every kind
//! disabled. The settings page writes everything except the flags; the alert
//! dispatcher writes only the flags.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::notifications::NotificationChannelConfig;

/// The monitored alert conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    /// Orders placed this period fell below the prior period
    RevenueRateLow,
    /// Sales totals this period fell below the prior period
    OrderGrowthLow,
    /// Storefront traffic this period fell below the prior period
    TrafficRateLow,
    /// Conversion rate fell below the configured absolute threshold
    ConversionRateLow,
}

impl AlertKind {
    pub const ALL: [AlertKind; 4] = [
        AlertKind::RevenueRateLow,
        AlertKind::OrderGrowthLow,
        AlertKind::TrafficRateLow,
        AlertKind::ConversionRateLow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::RevenueRateLow => "revenueRateLow",
            AlertKind::OrderGrowthLow => "orderGrowthLow",
            AlertKind::TrafficRateLow => "trafficRateLow",
            AlertKind::ConversionRateLow => "conversionRateLow",
        }
    }

    pub fn from_key(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Whether the kind compares the current period against the prior one
    /// (as opposed to an absolute threshold)
    pub fn is_period_comparison(&self) -> bool {
        !matches!(self, AlertKind::ConversionRateLow)
    }

    /// Column holding the merchant's enabled toggle for this kind
    fn enabled_column(&self) -> &'static str {
        match self {
            AlertKind::RevenueRateLow => "revenue_rate_low",
            AlertKind::OrderGrowthLow => "order_growth_low",
            AlertKind::TrafficRateLow => "traffic_rate_low",
            AlertKind::ConversionRateLow => "conversion_rate_low",
        }
    }

    /// Column holding the notified flag for this kind
    fn flag_column(&self) -> &'static str {
        match self {
            AlertKind::RevenueRateLow => "send_revenue_alert",
            AlertKind::OrderGrowthLow => "send_sales_alert",
            AlertKind::TrafficRateLow => "send_traffic_alert",
            AlertKind::ConversionRateLow => "send_conversion_alert",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert settings row for one shop
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AlertSettings {
    pub shop: String,
    pub revenue_rate_low: bool,
    pub order_growth_low: bool,
    pub traffic_rate_low: bool,
    pub conversion_rate_low: bool,
    pub conversion_rate_threshold: Option<f64>,
    pub alert_email: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub slack_enabled: bool,
    pub send_revenue_alert: bool,
    pub send_sales_alert: bool,
    pub send_traffic_alert: bool,
    pub send_conversion_alert: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// One monitored condition for one shop, as the dispatcher sees it
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub shop: String,
    pub kind: AlertKind,
    pub enabled: bool,
    /// Absolute threshold, only meaningful for `ConversionRateLow`
    pub threshold: Option<f64>,
    pub notified_flag: bool,
}

/// Request to save the settings page
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateAlertSettingsRequest {
    pub revenue_rate_low: bool,
    pub order_growth_low: bool,
    pub traffic_rate_low: bool,
    pub conversion_rate_low: bool,
    pub conversion_rate_threshold: Option<f64>,
    pub alert_email: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub slack_enabled: bool,
}

const SELECT_COLUMNS: &str = r#"
    SELECT shop, revenue_rate_low, order_growth_low, traffic_rate_low, conversion_rate_low,
           conversion_rate_threshold, alert_email, slack_webhook_url, slack_enabled,
           send_revenue_alert, send_sales_alert, send_traffic_alert, send_conversion_alert,
           created_at, updated_at
    FROM alert_settings
"#;

/// Empty strings from form posts mean "not configured"
fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl AlertSettings {
    pub fn is_enabled(&self, kind: AlertKind) -> bool {
        match kind {
            AlertKind::RevenueRateLow => self.revenue_rate_low,
            AlertKind::OrderGrowthLow => self.order_growth_low,
            AlertKind::TrafficRateLow => self.traffic_rate_low,
            AlertKind::ConversionRateLow => self.conversion_rate_low,
        }
    }

    pub fn is_notified(&self, kind: AlertKind) -> bool {
        match kind {
            AlertKind::RevenueRateLow => self.send_revenue_alert,
            AlertKind::OrderGrowthLow => self.send_sales_alert,
            AlertKind::TrafficRateLow => self.send_traffic_alert,
            AlertKind::ConversionRateLow => self.send_conversion_alert,
        }
    }

    /// Kinds the merchant has switched on
    pub fn enabled_kinds(&self) -> Vec<AlertKind> {
        AlertKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    pub fn rule(&self, kind: AlertKind) -> AlertRule {
        AlertRule {
            shop: self.shop.clone(),
            kind,
            enabled: self.is_enabled(kind),
            threshold: match kind {
                AlertKind::ConversionRateLow => self.conversion_rate_threshold,
                _ => None,
            },
            notified_flag: self.is_notified(kind),
        }
    }

    pub fn channel_config(&self) -> NotificationChannelConfig {
        NotificationChannelConfig {
            alert_email: non_empty(&self.alert_email),
            slack_webhook_url: non_empty(&self.slack_webhook_url),
            slack_enabled: self.slack_enabled,
            enabled_kinds: self.enabled_kinds(),
        }
    }

    /// Get the settings row for a shop
    pub async fn get(db: &SqlitePool, shop: &str) -> Result<Option<AlertSettings>, sqlx::Error> {
        sqlx::query_as(&format!("{} WHERE shop = ?", SELECT_COLUMNS))
            .bind(shop)
            .fetch_optional(db)
            .await
    }

    /// Get the settings row for a shop, creating the all-disabled default on first access
    pub async fn get_or_create(db: &SqlitePool, shop: &str) -> Result<AlertSettings, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO alert_settings (shop, created_at, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(shop) DO NOTHING
            "#,
        )
        .bind(shop)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await?;

        Self::get(db, shop).await?.ok_or(sqlx::Error::RowNotFound)
    }

    /// Save the merchant-editable settings. Notified flags are left untouched.
    pub async fn upsert(
        db: &SqlitePool,
        shop: &str,
        req: &UpdateAlertSettingsRequest,
    ) -> Result<AlertSettings, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO alert_settings (
                shop, revenue_rate_low, order_growth_low, traffic_rate_low, conversion_rate_low,
                conversion_rate_threshold, alert_email, slack_webhook_url, slack_enabled,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(shop) DO UPDATE SET
                revenue_rate_low = excluded.revenue_rate_low,
                order_growth_low = excluded.order_growth_low,
                traffic_rate_low = excluded.traffic_rate_low,
                conversion_rate_low = excluded.conversion_rate_low,
                conversion_rate_threshold = excluded.conversion_rate_threshold,
                alert_email = excluded.alert_email,
                slack_webhook_url = excluded.slack_webhook_url,
                slack_enabled = excluded.slack_enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(shop)
        .bind(req.revenue_rate_low)
        .bind(req.order_growth_low)
        .bind(req.traffic_rate_low)
        .bind(req.conversion_rate_low)
        .bind(req.conversion_rate_threshold)
        .bind(non_empty(&req.alert_email))
        .bind(non_empty(&req.slack_webhook_url))
        .bind(req.slack_enabled)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await?;

        Self::get(db, shop).await?.ok_or(sqlx::Error::RowNotFound)
    }

    /// Overwrite the notified flag for one kind. Returns false when the shop has no row.
    pub async fn set_notified(
        db: &SqlitePool,
        shop: &str,
        kind: AlertKind,
        value: bool,
    ) -> Result<bool, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();

        // Column name comes from the closed AlertKind table, never from input
        let sql = format!(
            "UPDATE alert_settings SET {} = ?, updated_at = ? WHERE shop = ?",
            kind.flag_column()
        );

        let result = sqlx::query(&sql)
            .bind(value)
            .bind(&now)
            .bind(shop)
            .execute(db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Clear every notified flag for a shop. Returns false when the shop has no row.
    pub async fn reset_notified(db: &SqlitePool, shop: &str) -> Result<bool, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE alert_settings
            SET send_revenue_alert = 0, send_sales_alert = 0,
                send_traffic_alert = 0, send_conversion_alert = 0,
                updated_at = ?
            WHERE shop = ?
            "#,
        )
        .bind(&now)
        .bind(shop)
        .execute(db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Shops with at least one alert kind enabled, for scheduled sweeps
    pub async fn list_shops_with_enabled_alerts(db: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
        let condition = AlertKind::ALL
            .iter()
            .map(|kind| format!("{} = 1", kind.enabled_column()))
            .collect::<Vec<_>>()
            .join(" OR ");

        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT shop FROM alert_settings WHERE {} ORDER BY shop ASC",
            condition
        ))
        .fetch_all(db)
        .await?;

        Ok(rows.into_iter().map(|(shop,)| shop).collect())
    }
}
