//! Alert dispatcher.
//!
//! Runs the evaluation of every alert kind for a shop, consults the notified
//! flags, sends breach notifications and resets flags once a condition clears.
//! Each kind is evaluated independently: a failure in one kind is reported in
//! that kind's result and never aborts the others.

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api::metrics::record_evaluation;
use crate::config::AlertsConfig;
use crate::db::{AlertKind, AlertSettings};
use crate::notifications::{
    DeliveryReport, NotificationChannelConfig, NotificationKind, NotificationSender,
};
use crate::sources::{fetch_snapshot, MetricSource, PeriodWindows};
use crate::DbPool;

use super::{AlertError, AlertFlagStore, AlertState, ThresholdEvaluator, Transition};

/// Timing knobs for one dispatcher
#[derive(Debug, Clone, Copy)]
pub struct DispatcherOptions {
    pub window_days: i64,
    pub fetch_timeout: Duration,
    pub send_timeout: Duration,
}

impl DispatcherOptions {
    pub fn from_config(config: &AlertsConfig) -> Self {
        Self {
            window_days: config.window_days,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
        }
    }
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self::from_config(&AlertsConfig::default())
    }
}

/// Outcome of evaluating one alert kind
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    /// Whether metrics were fetched and compared
    pub checked: bool,
    pub alert_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack_sent: Option<bool>,
    /// Why the kind was not checked (disabled, not configured)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Failure that prevented or followed the check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvalResult {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    fn failed(err: &AlertError) -> Self {
        match err {
            AlertError::Configuration(reason) => Self::skipped(reason.clone()),
            other => Self {
                error: Some(other.to_string()),
                ..Default::default()
            },
        }
    }
}

/// Per-kind results of one `check_all` call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertResults {
    pub revenue: EvalResult,
    pub sales_growth: EvalResult,
    pub traffic: EvalResult,
    pub conversion: EvalResult,
}

impl AlertResults {
    pub fn get(&self, kind: AlertKind) -> &EvalResult {
        match kind {
            AlertKind::RevenueRateLow => &self.revenue,
            AlertKind::OrderGrowthLow => &self.sales_growth,
            AlertKind::TrafficRateLow => &self.traffic,
            AlertKind::ConversionRateLow => &self.conversion,
        }
    }

    fn slot(&mut self, kind: AlertKind) -> &mut EvalResult {
        match kind {
            AlertKind::RevenueRateLow => &mut self.revenue,
            AlertKind::OrderGrowthLow => &mut self.sales_growth,
            AlertKind::TrafficRateLow => &mut self.traffic,
            AlertKind::ConversionRateLow => &mut self.conversion,
        }
    }

    fn all(result: EvalResult) -> Self {
        Self {
            revenue: result.clone(),
            sales_growth: result.clone(),
            traffic: result.clone(),
            conversion: result,
        }
    }

    /// Number of kinds that sent a notification
    pub fn sent_count(&self) -> usize {
        AlertKind::ALL
            .iter()
            .filter(|kind| self.get(**kind).alert_sent)
            .count()
    }

    /// Number of enabled kinds that could not be evaluated
    pub fn failed_count(&self) -> usize {
        AlertKind::ALL
            .iter()
            .filter(|kind| self.get(**kind).error.is_some())
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAllResult {
    pub shop: String,
    pub timestamp: String,
    pub alerts: AlertResults,
}

type LockKey = (String, AlertKind);
type LockRegistry = DashMap<LockKey, Arc<Mutex<()>>>;

/// Holds one (shop, kind) lock. Dropping it releases the lock and removes the
/// registry entry once no other task holds or awaits it.
struct KindLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: LockKey,
    registry: &'a LockRegistry,
}

impl Drop for KindLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.registry
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Orchestrates alert evaluation, notification and flag bookkeeping
pub struct AlertDispatcher {
    db: DbPool,
    source: Arc<dyn MetricSource>,
    flags: Arc<dyn AlertFlagStore>,
    sender: Arc<dyn NotificationSender>,
    /// Serializes evaluations of the same (shop, kind) within this process
    locks: LockRegistry,
    options: DispatcherOptions,
}

impl AlertDispatcher {
    pub fn new(
        db: DbPool,
        source: Arc<dyn MetricSource>,
        flags: Arc<dyn AlertFlagStore>,
        sender: Arc<dyn NotificationSender>,
        options: DispatcherOptions,
    ) -> Self {
        Self {
            db,
            source,
            flags,
            sender,
            locks: DashMap::new(),
            options,
        }
    }

    async fn lock(&self, shop: &str, kind: AlertKind) -> KindLock<'_> {
        let key = (shop.to_string(), kind);
        // Cloned under the shard lock, so eviction sees this waiter
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        KindLock {
            guard: Some(mutex.lock_owned().await),
            key,
            registry: &self.locks,
        }
    }

    /// Evaluate every alert kind for a shop
    pub async fn check_all(&self, shop: &str) -> CheckAllResult {
        let now = Utc::now();
        let timestamp = now.to_rfc3339();

        let settings = match AlertSettings::get(&self.db, shop).await {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                tracing::debug!(shop = %shop, "No alert settings, skipping alert check");
                return CheckAllResult {
                    shop: shop.to_string(),
                    timestamp,
                    alerts: AlertResults::all(EvalResult::skipped("Alert settings not found")),
                };
            }
            Err(e) => {
                tracing::error!(shop = %shop, error = %e, "Failed to load alert settings");
                return CheckAllResult {
                    shop: shop.to_string(),
                    timestamp,
                    alerts: AlertResults::all(EvalResult::failed(&AlertError::Database(e))),
                };
            }
        };

        let windows = PeriodWindows::trailing(now, self.options.window_days);
        let (settings, windows) = (&settings, &windows);
        let outcomes = join_all(
            AlertKind::ALL
                .into_iter()
                .map(|kind| async move { (kind, self.check_kind(settings, kind, windows).await) }),
        )
        .await;

        let mut alerts = AlertResults::default();
        for (kind, result) in outcomes {
            *alerts.slot(kind) = result;
        }

        tracing::debug!(
            shop = %shop,
            sent = alerts.sent_count(),
            failed = alerts.failed_count(),
            "Alert check completed"
        );

        CheckAllResult {
            shop: shop.to_string(),
            timestamp,
            alerts,
        }
    }

    async fn check_kind(
        &self,
        settings: &AlertSettings,
        kind: AlertKind,
        windows: &PeriodWindows,
    ) -> EvalResult {
        let shop = settings.shop.as_str();
        let rule = settings.rule(kind);

        if !rule.enabled {
            record_evaluation(kind.as_str(), "disabled");
            return EvalResult::skipped(format!("{} alert not enabled", kind));
        }
        if kind == AlertKind::ConversionRateLow && rule.threshold.is_none() {
            record_evaluation(kind.as_str(), "not_configured");
            return EvalResult::skipped("Conversion rate threshold not configured");
        }

        let _lock = self.lock(shop, kind).await;

        let snapshot = match tokio::time::timeout(
            self.options.fetch_timeout,
            fetch_snapshot(self.source.as_ref(), &rule, windows),
        )
        .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return self.evaluation_failed(shop, kind, e),
            Err(_) => {
                return self.evaluation_failed(
                    shop,
                    kind,
                    AlertError::Timeout {
                        operation: "metric fetch",
                        seconds: self.options.fetch_timeout.as_secs(),
                    },
                )
            }
        };

        let breached = ThresholdEvaluator::is_breached(kind, &snapshot, &rule);

        // Read under the lock, the settings row may be stale by now
        let flag = match self.flags.get(shop, kind).await {
            Ok(flag) => flag,
            Err(e) => return self.evaluation_failed(shop, kind, e),
        };

        let mut result = EvalResult {
            checked: true,
            breached: Some(breached),
            current_value: Some(snapshot.current_value),
            prior_value: snapshot.prior_value,
            threshold: rule.threshold,
            ..Default::default()
        };

        match AlertState::from_observation(flag, breached).transition() {
            Transition::Notify => {
                tracing::info!(
                    shop = %shop,
                    kind = %kind,
                    current = snapshot.current_value,
                    prior = ?snapshot.prior_value,
                    threshold = ?rule.threshold,
                    "Alert condition breached, sending notification"
                );

                let report = self
                    .deliver(NotificationKind::Alert(kind), shop, &settings.channel_config())
                    .await;
                result.alert_sent = report.sent;
                result.email_sent = Some(report.email_sent);
                result.slack_sent = Some(report.slack_sent);

                if report.sent {
                    if let Err(e) = self.flags.set(shop, kind, true).await {
                        tracing::error!(
                            shop = %shop,
                            kind = %kind,
                            error = %e,
                            "Notification sent but notified flag could not be stored"
                        );
                        result.error = Some(e.to_string());
                    } else {
                        tracing::info!(shop = %shop, kind = %kind, "Notified flag set");
                    }
                    record_evaluation(kind.as_str(), "notified");
                } else {
                    tracing::warn!(
                        shop = %shop,
                        kind = %kind,
                        "No notification channel succeeded, flag left unset"
                    );
                    record_evaluation(kind.as_str(), "send_failed");
                }
            }
            Transition::Reset => {
                match self.flags.set(shop, kind, false).await {
                    Ok(()) => {
                        tracing::info!(shop = %shop, kind = %kind, "Alert condition cleared, flag reset");
                    }
                    Err(e) => {
                        tracing::error!(shop = %shop, kind = %kind, error = %e, "Failed to reset notified flag");
                        result.error = Some(e.to_string());
                    }
                }
                record_evaluation(kind.as_str(), "reset");
            }
            Transition::Hold => {
                record_evaluation(kind.as_str(), "unchanged");
            }
        }

        result
    }

    fn evaluation_failed(&self, shop: &str, kind: AlertKind, err: AlertError) -> EvalResult {
        if err.is_transient() {
            tracing::warn!(shop = %shop, kind = %kind, error = %err, "Alert evaluation skipped");
        } else {
            tracing::error!(shop = %shop, kind = %kind, error = %err, "Alert evaluation failed");
        }
        record_evaluation(kind.as_str(), "failed");
        EvalResult::failed(&err)
    }

    /// Send through the notification sender, bounded by the send timeout
    async fn deliver(
        &self,
        kind: NotificationKind,
        shop: &str,
        config: &NotificationChannelConfig,
    ) -> DeliveryReport {
        match tokio::time::timeout(
            self.options.send_timeout,
            self.sender.send(kind, shop, config),
        )
        .await
        {
            Ok(report) => report,
            Err(_) => {
                tracing::warn!(
                    shop = %shop,
                    kind = %kind,
                    timeout_secs = self.options.send_timeout.as_secs(),
                    "Notification send timed out"
                );
                DeliveryReport::default()
            }
        }
    }

    /// Clear every notified flag of a shop
    pub async fn reset_flags(&self, shop: &str) -> Result<(), AlertError> {
        let mut locks = Vec::with_capacity(AlertKind::ALL.len());
        for kind in AlertKind::ALL {
            locks.push(self.lock(shop, kind).await);
        }

        self.flags.reset_all(shop).await?;
        tracing::info!(shop = %shop, "Notified flags reset");
        Ok(())
    }

    /// Overwrite one notified flag
    pub async fn set_flag(&self, shop: &str, kind: AlertKind, value: bool) -> Result<(), AlertError> {
        let _lock = self.lock(shop, kind).await;

        self.flags.set(shop, kind, value).await?;
        tracing::info!(shop = %shop, kind = %kind, value = value, "Notified flag overridden");
        Ok(())
    }

    /// Send the notification for a kind by name without evaluating metrics.
    /// Flags are not touched.
    pub async fn trigger(&self, shop: &str, kind_name: &str) -> Result<DeliveryReport, AlertError> {
        let kind = NotificationKind::from_key(kind_name)
            .ok_or_else(|| AlertError::UnknownKind(kind_name.to_string()))?;

        let settings = AlertSettings::get(&self.db, shop)
            .await?
            .ok_or_else(|| AlertError::Configuration("Alert settings not found".to_string()))?;

        let report = self.deliver(kind, shop, &settings.channel_config()).await;
        tracing::info!(
            shop = %shop,
            kind = %kind,
            email_sent = report.email_sent,
            slack_sent = report.slack_sent,
            "Manual alert triggered"
        );
        Ok(report)
    }

    /// Send the email delivery test to the configured alert address
    pub async fn test_email(&self, shop: &str) -> Result<DeliveryReport, AlertError> {
        let config = AlertSettings::get(&self.db, shop)
            .await?
            .map(|settings| settings.channel_config())
            .filter(|config| config.alert_email.is_some())
            .ok_or_else(|| AlertError::Configuration("No alert email configured".to_string()))?;

        let report = self.deliver(NotificationKind::EmailTest, shop, &config).await;
        if !report.email_sent {
            return Err(AlertError::Delivery(
                "Test email could not be delivered".to_string(),
            ));
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_in_memory, UpdateAlertSettingsRequest};
    use crate::engine::SqliteFlagStore;
    use crate::notifications::plan_channels;
    use crate::sources::Window;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    const SHOP: &str = "scenario.myshopify.com";

    /// Current and prior values per metric; the current window is the inclusive one
    #[derive(Clone, Default)]
    struct Values {
        totals: (f64, f64),
        orders: (u64, u64),
        sessions: (u64, u64),
        checkouts: (u64, u64),
        fail_sessions: bool,
        slow_orders: bool,
    }

    #[derive(Default)]
    struct FakeSource {
        values: StdMutex<Values>,
    }

    impl FakeSource {
        fn with(values: Values) -> Arc<Self> {
            Arc::new(Self {
                values: StdMutex::new(values),
            })
        }

        fn update(&self, f: impl FnOnce(&mut Values)) {
            f(&mut self.values.lock().unwrap());
        }

        fn pick<T: Copy>(window: Window, pair: (T, T)) -> T {
            if window.inclusive_end {
                pair.0
            } else {
                pair.1
            }
        }
    }

    #[async_trait]
    impl MetricSource for FakeSource {
        async fn order_totals(&self, _shop: &str, window: Window) -> Result<f64, AlertError> {
            let totals = self.values.lock().unwrap().totals;
            Ok(Self::pick(window, totals))
        }

        async fn order_count(&self, _shop: &str, window: Window) -> Result<u64, AlertError> {
            let (orders, slow) = {
                let v = self.values.lock().unwrap();
                (v.orders, v.slow_orders)
            };
            if slow {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Ok(Self::pick(window, orders))
        }

        async fn session_count(&self, _shop: &str, window: Window) -> Result<u64, AlertError> {
            let v = self.values.lock().unwrap().clone();
            if v.fail_sessions {
                return Err(AlertError::Fetch("traffic store unreachable".to_string()));
            }
            Ok(Self::pick(window, v.sessions))
        }

        async fn checkout_session_count(
            &self,
            _shop: &str,
            window: Window,
        ) -> Result<u64, AlertError> {
            let checkouts = self.values.lock().unwrap().checkouts;
            Ok(Self::pick(window, checkouts))
        }
    }

    /// Records sends and reports success for every planned channel that is marked working
    struct FakeSender {
        sent: StdMutex<Vec<NotificationKind>>,
        email_works: bool,
        slack_works: bool,
    }

    impl FakeSender {
        fn new(email_works: bool, slack_works: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
                email_works,
                slack_works,
            })
        }

        fn count(&self, kind: NotificationKind) -> usize {
            self.sent.lock().unwrap().iter().filter(|k| **k == kind).count()
        }
    }

    #[async_trait]
    impl NotificationSender for FakeSender {
        async fn send(
            &self,
            kind: NotificationKind,
            _shop: &str,
            config: &NotificationChannelConfig,
        ) -> DeliveryReport {
            self.sent.lock().unwrap().push(kind);
            let plan = plan_channels(kind, config);
            DeliveryReport::new(
                plan.email_to.is_some() && self.email_works,
                plan.slack_url.is_some() && self.slack_works,
            )
        }
    }

    fn settings(kinds: &[AlertKind], slack_enabled: bool) -> UpdateAlertSettingsRequest {
        UpdateAlertSettingsRequest {
            revenue_rate_low: kinds.contains(&AlertKind::RevenueRateLow),
            order_growth_low: kinds.contains(&AlertKind::OrderGrowthLow),
            traffic_rate_low: kinds.contains(&AlertKind::TrafficRateLow),
            conversion_rate_low: kinds.contains(&AlertKind::ConversionRateLow),
            conversion_rate_threshold: Some(2.0),
            alert_email: Some("owner@example.com".to_string()),
            slack_webhook_url: Some("https://hooks.slack.com/services/T/B/X".to_string()),
            slack_enabled,
        }
    }

    async fn setup(
        req: UpdateAlertSettingsRequest,
        source: Arc<FakeSource>,
        sender: Arc<FakeSender>,
    ) -> (AlertDispatcher, DbPool) {
        let db = init_in_memory().await.unwrap();
        AlertSettings::upsert(&db, SHOP, &req).await.unwrap();

        let dispatcher = AlertDispatcher::new(
            db.clone(),
            source,
            Arc::new(SqliteFlagStore::new(db.clone())),
            sender,
            DispatcherOptions {
                window_days: 7,
                fetch_timeout: Duration::from_millis(100),
                send_timeout: Duration::from_secs(1),
            },
        );
        (dispatcher, db)
    }

    async fn flag(db: &DbPool, kind: AlertKind) -> bool {
        AlertSettings::get(db, SHOP)
            .await
            .unwrap()
            .unwrap()
            .is_notified(kind)
    }

    #[tokio::test]
    async fn test_sales_drop_notifies_then_recovers() {
        let source = FakeSource::with(Values {
            totals: (500.0, 800.0),
            ..Default::default()
        });
        let sender = FakeSender::new(true, true);
        let (dispatcher, db) = setup(
            settings(&[AlertKind::OrderGrowthLow], true),
            source.clone(),
            sender.clone(),
        )
        .await;

        let result = dispatcher.check_all(SHOP).await;
        let sales = &result.alerts.sales_growth;
        assert!(sales.checked);
        assert!(sales.alert_sent);
        assert_eq!(sales.current_value, Some(500.0));
        assert_eq!(sales.prior_value, Some(800.0));
        assert!(flag(&db, AlertKind::OrderGrowthLow).await);

        source.update(|v| v.totals = (900.0, 800.0));
        let result = dispatcher.check_all(SHOP).await;
        let sales = &result.alerts.sales_growth;
        assert!(sales.checked);
        assert!(!sales.alert_sent);
        assert_eq!(sales.breached, Some(false));
        assert!(!flag(&db, AlertKind::OrderGrowthLow).await);

        // No "recovered" notification
        assert_eq!(
            sender.count(NotificationKind::Alert(AlertKind::OrderGrowthLow)),
            1
        );
    }

    #[tokio::test]
    async fn test_repeated_checks_send_once() {
        let source = FakeSource::with(Values {
            totals: (500.0, 800.0),
            ..Default::default()
        });
        let sender = FakeSender::new(true, false);
        let (dispatcher, _db) = setup(
            settings(&[AlertKind::OrderGrowthLow], false),
            source,
            sender.clone(),
        )
        .await;

        dispatcher.check_all(SHOP).await;
        let second = dispatcher.check_all(SHOP).await;

        assert!(second.alerts.sales_growth.checked);
        assert!(!second.alerts.sales_growth.alert_sent);
        assert_eq!(second.alerts.sales_growth.breached, Some(true));
        assert_eq!(
            sender.count(NotificationKind::Alert(AlertKind::OrderGrowthLow)),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_checks_send_once() {
        let source = FakeSource::with(Values {
            totals: (500.0, 800.0),
            ..Default::default()
        });
        let sender = FakeSender::new(true, false);
        let (dispatcher, _db) = setup(
            settings(&[AlertKind::OrderGrowthLow], false),
            source,
            sender.clone(),
        )
        .await;

        let (a, b) = tokio::join!(dispatcher.check_all(SHOP), dispatcher.check_all(SHOP));
        let sent = [a, b]
            .iter()
            .filter(|r| r.alerts.sales_growth.alert_sent)
            .count();

        assert_eq!(sent, 1);
        assert_eq!(
            sender.count(NotificationKind::Alert(AlertKind::OrderGrowthLow)),
            1
        );
    }

    #[tokio::test]
    async fn test_lock_registry_is_pruned() {
        let source = FakeSource::with(Values {
            totals: (500.0, 800.0),
            ..Default::default()
        });
        let sender = FakeSender::new(true, false);
        let (dispatcher, db) = setup(settings(&AlertKind::ALL, false), source, sender).await;

        let (a, b) = tokio::join!(dispatcher.check_all(SHOP), dispatcher.check_all(SHOP));
        assert!(a.alerts.sales_growth.checked && b.alerts.sales_growth.checked);
        assert!(dispatcher.locks.is_empty());

        dispatcher
            .set_flag(SHOP, AlertKind::TrafficRateLow, true)
            .await
            .unwrap();
        dispatcher.reset_flags(SHOP).await.unwrap();
        for n in 0..20 {
            let shop = format!("shop-{}.myshopify.com", n);
            AlertSettings::upsert(&db, &shop, &settings(&AlertKind::ALL, false))
                .await
                .unwrap();
            assert!(dispatcher.check_all(&shop).await.alerts.sales_growth.checked);
        }
        assert!(dispatcher.locks.is_empty());

        // Held while in use
        let held = dispatcher.lock(SHOP, AlertKind::OrderGrowthLow).await;
        assert_eq!(dispatcher.locks.len(), 1);
        drop(held);
        assert!(dispatcher.locks.is_empty());
    }

    #[tokio::test]
    async fn test_low_conversion_notifies() {
        let source = FakeSource::with(Values {
            orders: (0, 0),
            checkouts: (50, 40),
            ..Default::default()
        });
        let sender = FakeSender::new(true, true);
        let (dispatcher, db) = setup(
            settings(&[AlertKind::ConversionRateLow], true),
            source,
            sender,
        )
        .await;

        let result = dispatcher.check_all(SHOP).await;
        let conversion = &result.alerts.conversion;
        assert!(conversion.alert_sent);
        assert_eq!(conversion.current_value, Some(0.0));
        assert_eq!(conversion.threshold, Some(2.0));
        assert_eq!(conversion.email_sent, Some(true));
        assert_eq!(conversion.slack_sent, Some(true));
        assert!(flag(&db, AlertKind::ConversionRateLow).await);
    }

    #[tokio::test]
    async fn test_zero_prior_traffic_does_not_alert() {
        let source = FakeSource::with(Values {
            sessions: (5, 0),
            ..Default::default()
        });
        let sender = FakeSender::new(true, true);
        let (dispatcher, db) = setup(
            settings(&[AlertKind::TrafficRateLow], true),
            source,
            sender.clone(),
        )
        .await;

        let result = dispatcher.check_all(SHOP).await;
        assert!(result.alerts.traffic.checked);
        assert!(!result.alerts.traffic.alert_sent);
        assert_eq!(result.alerts.traffic.breached, Some(false));
        assert!(!flag(&db, AlertKind::TrafficRateLow).await);
        assert_eq!(sender.count(NotificationKind::Alert(AlertKind::TrafficRateLow)), 0);
    }

    #[tokio::test]
    async fn test_failed_send_leaves_flag_unset() {
        let source = FakeSource::with(Values {
            orders: (2, 9),
            ..Default::default()
        });
        let sender = FakeSender::new(false, false);
        let (dispatcher, db) = setup(
            settings(&[AlertKind::RevenueRateLow], true),
            source,
            sender.clone(),
        )
        .await;

        let result = dispatcher.check_all(SHOP).await;
        assert!(result.alerts.revenue.checked);
        assert!(!result.alerts.revenue.alert_sent);
        assert!(!flag(&db, AlertKind::RevenueRateLow).await);

        // Still armed, so the next run retries
        dispatcher.check_all(SHOP).await;
        assert_eq!(sender.count(NotificationKind::Alert(AlertKind::RevenueRateLow)), 2);
    }

    #[tokio::test]
    async fn test_email_only_when_slack_disabled() {
        let source = FakeSource::with(Values {
            totals: (100.0, 300.0),
            ..Default::default()
        });
        let sender = FakeSender::new(true, true);
        let (dispatcher, db) = setup(
            settings(&[AlertKind::OrderGrowthLow], false),
            source,
            sender,
        )
        .await;

        let result = dispatcher.check_all(SHOP).await;
        let sales = &result.alerts.sales_growth;
        assert!(sales.alert_sent);
        assert_eq!(sales.email_sent, Some(true));
        assert_eq!(sales.slack_sent, Some(false));
        assert!(flag(&db, AlertKind::OrderGrowthLow).await);
    }

    #[tokio::test]
    async fn test_traffic_failure_is_isolated() {
        let source = FakeSource::with(Values {
            totals: (500.0, 800.0),
            orders: (0, 3),
            sessions: (10, 20),
            checkouts: (10, 0),
            fail_sessions: true,
            ..Default::default()
        });
        let sender = FakeSender::new(true, false);
        let (dispatcher, db) = setup(settings(&AlertKind::ALL, false), source, sender).await;

        AlertSettings::set_notified(&db, SHOP, AlertKind::TrafficRateLow, true)
            .await
            .unwrap();

        let result = dispatcher.check_all(SHOP).await;

        assert!(!result.alerts.traffic.checked);
        assert!(result.alerts.traffic.error.is_some());
        // Flag untouched on a failed evaluation
        assert!(flag(&db, AlertKind::TrafficRateLow).await);

        assert!(result.alerts.sales_growth.checked);
        assert!(result.alerts.sales_growth.alert_sent);
        assert!(result.alerts.revenue.checked);
        assert!(result.alerts.revenue.alert_sent);
        // Conversion reads pixel sessions, not the failing traffic store
        assert!(result.alerts.conversion.checked);
        assert!(result.alerts.conversion.error.is_none());
        assert_eq!(result.alerts.conversion.current_value, Some(0.0));
        assert!(result.alerts.conversion.alert_sent);
        assert!(flag(&db, AlertKind::ConversionRateLow).await);

        assert_eq!(result.alerts.failed_count(), 1);
        assert_eq!(result.alerts.sent_count(), 3);
    }

    #[tokio::test]
    async fn test_fetch_timeout_leaves_flag_unchanged() {
        let source = FakeSource::with(Values {
            orders: (9, 1),
            slow_orders: true,
            ..Default::default()
        });
        let sender = FakeSender::new(true, true);
        let (dispatcher, db) = setup(
            settings(&[AlertKind::RevenueRateLow], true),
            source,
            sender.clone(),
        )
        .await;

        AlertSettings::set_notified(&db, SHOP, AlertKind::RevenueRateLow, true)
            .await
            .unwrap();

        let result = dispatcher.check_all(SHOP).await;
        let revenue = &result.alerts.revenue;
        assert!(!revenue.checked);
        assert!(revenue.error.as_deref().unwrap().contains("timed out"));
        // Recovered values were never seen, so no reset
        assert!(flag(&db, AlertKind::RevenueRateLow).await);
        assert_eq!(sender.count(NotificationKind::Alert(AlertKind::RevenueRateLow)), 0);
    }

    #[tokio::test]
    async fn test_disabled_and_unconfigured_kinds() {
        let source = FakeSource::with(Values::default());
        let mut req = settings(&[AlertKind::ConversionRateLow], false);
        req.conversion_rate_threshold = None;
        let (dispatcher, _db) = setup(req, source, FakeSender::new(true, true)).await;

        let result = dispatcher.check_all(SHOP).await;
        assert_eq!(
            result.alerts.traffic.reason.as_deref(),
            Some("trafficRateLow alert not enabled")
        );
        assert!(!result.alerts.conversion.checked);
        assert_eq!(
            result.alerts.conversion.reason.as_deref(),
            Some("Conversion rate threshold not configured")
        );
    }

    #[tokio::test]
    async fn test_missing_settings_reports_not_checked() {
        let db = init_in_memory().await.unwrap();
        let dispatcher = AlertDispatcher::new(
            db.clone(),
            FakeSource::with(Values::default()),
            Arc::new(SqliteFlagStore::new(db)),
            FakeSender::new(true, true),
            DispatcherOptions::default(),
        );

        let result = dispatcher.check_all("nobody.myshopify.com").await;
        for kind in AlertKind::ALL {
            let r = result.alerts.get(kind);
            assert!(!r.checked);
            assert_eq!(r.reason.as_deref(), Some("Alert settings not found"));
        }
    }

    #[tokio::test]
    async fn test_check_all_serializes_camel_case() {
        let source = FakeSource::with(Values {
            totals: (500.0, 800.0),
            ..Default::default()
        });
        let (dispatcher, _db) = setup(
            settings(&[AlertKind::OrderGrowthLow], false),
            source,
            FakeSender::new(true, false),
        )
        .await;

        let json = serde_json::to_value(dispatcher.check_all(SHOP).await).unwrap();
        assert_eq!(json["alerts"]["salesGrowth"]["alertSent"], true);
        assert_eq!(json["alerts"]["salesGrowth"]["currentValue"], 500.0);
        assert_eq!(json["alerts"]["revenue"]["checked"], false);
        assert!(json["alerts"]["revenue"].get("currentValue").is_none());
    }

    #[tokio::test]
    async fn test_reset_flags_and_override() {
        let (dispatcher, db) = setup(
            settings(&AlertKind::ALL, false),
            FakeSource::with(Values::default()),
            FakeSender::new(true, false),
        )
        .await;

        dispatcher
            .set_flag(SHOP, AlertKind::TrafficRateLow, true)
            .await
            .unwrap();
        dispatcher
            .set_flag(SHOP, AlertKind::ConversionRateLow, true)
            .await
            .unwrap();
        assert!(flag(&db, AlertKind::TrafficRateLow).await);

        dispatcher.reset_flags(SHOP).await.unwrap();
        for kind in AlertKind::ALL {
            assert!(!flag(&db, kind).await);
        }

        assert!(matches!(
            dispatcher.reset_flags("nobody.myshopify.com").await,
            Err(AlertError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_trigger() {
        let sender = FakeSender::new(true, true);
        let (dispatcher, db) = setup(
            settings(&[AlertKind::TrafficRateLow], true),
            FakeSource::with(Values::default()),
            sender.clone(),
        )
        .await;

        let report = dispatcher.trigger(SHOP, "trafficRateLow").await.unwrap();
        assert!(report.sent);
        assert!(report.email_sent && report.slack_sent);
        // Manual sends never touch flags
        assert!(!flag(&db, AlertKind::TrafficRateLow).await);

        let report = dispatcher.trigger(SHOP, "orderGrowthLow").await.unwrap();
        assert!(!report.sent);

        assert!(matches!(
            dispatcher.trigger(SHOP, "weeklyDigest").await,
            Err(AlertError::UnknownKind(_))
        ));
        assert!(matches!(
            dispatcher.trigger("nobody.myshopify.com", "trafficRateLow").await,
            Err(AlertError::Configuration(_))
        ));
        assert_eq!(sender.count(NotificationKind::Alert(AlertKind::TrafficRateLow)), 1);
    }

    #[tokio::test]
    async fn test_email_test() {
        let sender = FakeSender::new(true, true);
        let (dispatcher, db) = setup(
            settings(&[], true),
            FakeSource::with(Values::default()),
            sender.clone(),
        )
        .await;

        let report = dispatcher.test_email(SHOP).await.unwrap();
        assert!(report.email_sent);
        assert!(!report.slack_sent);

        let mut req = settings(&[], true);
        req.alert_email = None;
        AlertSettings::upsert(&db, SHOP, &req).await.unwrap();
        assert!(matches!(
            dispatcher.test_email(SHOP).await,
            Err(AlertError::Configuration(_))
        ));
        assert_eq!(sender.count(NotificationKind::EmailTest), 1);
    }
}
