//! Metric sources for alert evaluation.
//!
//! A [`MetricSource`] answers range questions for a shop: order totals, order
//! count, traffic sessions and pixel checkout sessions. [`fetch_snapshot`] maps
//! each alert kind to the questions it needs and turns the answers into a
//! [`MetricSnapshot`]. Traffic and conversion read separate stores, so one
//! failing leaves the other kind evaluable.

mod shopify;
mod traffic;

pub use shopify::*;
pub use traffic::*;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::{AlertKind, AlertRule};
use crate::engine::AlertError;

/// A time range queried from a metric source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Whether `to` itself belongs to the window
    pub inclusive_end: bool,
}

/// The current period and the equally long period right before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindows {
    /// `[now - days, now]`
    pub current: Window,
    /// `[now - 2 * days, now - days)`
    pub prior: Window,
}

impl PeriodWindows {
    pub fn trailing(now: DateTime<Utc>, days: i64) -> Self {
        let boundary = now - Duration::days(days);
        Self {
            current: Window {
                from: boundary,
                to: now,
                inclusive_end: true,
            },
            prior: Window {
                from: boundary - Duration::days(days),
                to: boundary,
                inclusive_end: false,
            },
        }
    }
}

/// Scalar values fetched for one evaluation. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub shop: String,
    pub kind: AlertKind,
    pub current_value: f64,
    /// Prior-period value; `None` for threshold kinds
    pub prior_value: Option<f64>,
}

/// Backing data for the alert metrics
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Sum of order amounts in the window
    async fn order_totals(&self, shop: &str, window: Window) -> Result<f64, AlertError>;

    /// Number of orders placed in the window
    async fn order_count(&self, shop: &str, window: Window) -> Result<u64, AlertError>;

    /// Number of tracked storefront sessions in the window
    async fn session_count(&self, shop: &str, window: Window) -> Result<u64, AlertError>;

    /// Number of web pixel sessions started in the window
    async fn checkout_session_count(&self, shop: &str, window: Window)
        -> Result<u64, AlertError>;
}

/// Orders per session as a percentage, clamped to `[0, 100]`. Zero sessions yield 0.
pub fn conversion_rate(orders: u64, sessions: u64) -> f64 {
    if sessions == 0 {
        return 0.0;
    }
    ((orders as f64 / sessions as f64) * 100.0).clamp(0.0, 100.0)
}

/// Fetch the values the rule's kind is evaluated on
pub async fn fetch_snapshot(
    source: &dyn MetricSource,
    rule: &AlertRule,
    windows: &PeriodWindows,
) -> Result<MetricSnapshot, AlertError> {
    let shop = rule.shop.as_str();

    let (current_value, prior_value) = match rule.kind {
        AlertKind::RevenueRateLow => {
            let (current, prior) = futures::try_join!(
                source.order_count(shop, windows.current),
                source.order_count(shop, windows.prior)
            )?;
            (current as f64, Some(prior as f64))
        }
        AlertKind::OrderGrowthLow => {
            let (current, prior) = futures::try_join!(
                source.order_totals(shop, windows.current),
                source.order_totals(shop, windows.prior)
            )?;
            (current, Some(prior))
        }
        AlertKind::TrafficRateLow => {
            let (current, prior) = futures::try_join!(
                source.session_count(shop, windows.current),
                source.session_count(shop, windows.prior)
            )?;
            (current as f64, Some(prior as f64))
        }
        AlertKind::ConversionRateLow => {
            let (orders, sessions) = futures::try_join!(
                source.order_count(shop, windows.current),
                source.checkout_session_count(shop, windows.current)
            )?;
            (conversion_rate(orders, sessions), None)
        }
    };

    Ok(MetricSnapshot {
        shop: rule.shop.clone(),
        kind: rule.kind,
        current_value,
        prior_value,
    })
}

/// Orders from the Admin API, sessions from the local traffic and pixel stores
pub struct ShopMetricSource {
    orders: ShopifyOrderSource,
    traffic: TrafficSessionSource,
    checkouts: CheckoutSessionSource,
}

impl ShopMetricSource {
    pub fn new(
        orders: ShopifyOrderSource,
        traffic: TrafficSessionSource,
        checkouts: CheckoutSessionSource,
    ) -> Self {
        Self {
            orders,
            traffic,
            checkouts,
        }
    }
}

#[async_trait]
impl MetricSource for ShopMetricSource {
    async fn order_totals(&self, shop: &str, window: Window) -> Result<f64, AlertError> {
        self.orders.order_totals(shop, window).await
    }

    async fn order_count(&self, shop: &str, window: Window) -> Result<u64, AlertError> {
        self.orders.order_count(shop, window).await
    }

    async fn session_count(&self, shop: &str, window: Window) -> Result<u64, AlertError> {
        self.traffic.session_count(shop, window).await
    }

    async fn checkout_session_count(
        &self,
        shop: &str,
        window: Window,
    ) -> Result<u64, AlertError> {
        self.checkouts.session_count(shop, window).await
    }
}
