//! Alert notifications over email and Slack.
//!
//! [`plan_channels`] decides which channels a notification goes to;
//! [`AlertNotifier`] performs the deliveries and reports the per-channel
//! outcome. A failed channel never fails the other one.

mod email;
pub mod templates;

pub use email::SmtpMailer;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

use crate::api::metrics::record_notification;
use crate::db::AlertKind;

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Alert(AlertKind),
    /// Email delivery check requested by the merchant. Never goes to Slack.
    EmailTest,
}

impl NotificationKind {
    pub fn from_key(s: &str) -> Option<Self> {
        if s.trim().eq_ignore_ascii_case("emailTest") {
            return Some(NotificationKind::EmailTest);
        }
        AlertKind::from_key(s).map(NotificationKind::Alert)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Alert(kind) => kind.as_str(),
            NotificationKind::EmailTest => "emailTest",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-shop channel configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationChannelConfig {
    pub alert_email: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub slack_enabled: bool,
    /// Alert kinds the merchant has switched on
    pub enabled_kinds: Vec<AlertKind>,
}

/// Channels a notification will be attempted on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPlan {
    pub email_to: Option<String>,
    pub slack_url: Option<String>,
}

impl ChannelPlan {
    pub fn is_empty(&self) -> bool {
        self.email_to.is_none() && self.slack_url.is_none()
    }
}

/// Email goes out when the kind is enabled and an address is configured.
/// Slack additionally needs `slack_enabled` and a webhook URL. The email test
/// ignores the enabled kinds and is email-only.
pub fn plan_channels(kind: NotificationKind, config: &NotificationChannelConfig) -> ChannelPlan {
    match kind {
        NotificationKind::EmailTest => ChannelPlan {
            email_to: config.alert_email.clone(),
            slack_url: None,
        },
        NotificationKind::Alert(alert) => {
            let enabled = config.enabled_kinds.contains(&alert);
            ChannelPlan {
                email_to: config.alert_email.clone().filter(|_| enabled),
                slack_url: config
                    .slack_webhook_url
                    .clone()
                    .filter(|_| enabled && config.slack_enabled),
            }
        }
    }
}

/// Per-channel delivery outcome. `sent` is true when any channel succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub sent: bool,
    pub email_sent: bool,
    pub slack_sent: bool,
}

impl DeliveryReport {
    pub fn new(email_sent: bool, slack_sent: bool) -> Self {
        Self {
            sent: email_sent || slack_sent,
            email_sent,
            slack_sent,
        }
    }
}

/// Delivers a notification to the channels the config allows
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        kind: NotificationKind,
        shop: &str,
        config: &NotificationChannelConfig,
    ) -> DeliveryReport;
}

/// Email over SMTP, Slack over incoming webhooks
pub struct AlertNotifier {
    mailer: Option<SmtpMailer>,
    http: reqwest::Client,
    send_timeout: Duration,
}

impl AlertNotifier {
    pub fn new(mailer: Option<SmtpMailer>, send_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(send_timeout).build()?;
        Ok(Self {
            mailer,
            http,
            send_timeout,
        })
    }

    async fn send_email(&self, kind: NotificationKind, shop: &str, to: &str) -> bool {
        let Some(mailer) = &self.mailer else {
            tracing::warn!(shop = %shop, kind = %kind, "Email not configured, skipping alert email");
            return false;
        };

        let email = templates::render_email(kind, shop);
        match tokio::time::timeout(self.send_timeout, mailer.send(to, &email)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(shop = %shop, kind = %kind, error = %e, "Failed to send alert email");
                false
            }
            Err(_) => {
                tracing::error!(
                    shop = %shop,
                    kind = %kind,
                    timeout_secs = self.send_timeout.as_secs(),
                    "Alert email timed out"
                );
                false
            }
        }
    }

    async fn send_slack(&self, kind: NotificationKind, shop: &str, url: &str) -> bool {
        let body = build_slack_payload(kind, shop);

        let result = async {
            let response = self.http.post(url).json(&body).send().await?;
            response.error_for_status()?;
            Ok::<_, reqwest::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                tracing::info!(shop = %shop, kind = %kind, "Slack notification sent");
                true
            }
            Err(e) => {
                tracing::error!(shop = %shop, kind = %kind, error = %e, "Failed to send Slack notification");
                false
            }
        }
    }
}

#[async_trait]
impl NotificationSender for AlertNotifier {
    async fn send(
        &self,
        kind: NotificationKind,
        shop: &str,
        config: &NotificationChannelConfig,
    ) -> DeliveryReport {
        let plan = plan_channels(kind, config);
        if plan.is_empty() {
            tracing::debug!(shop = %shop, kind = %kind, "No notification channel configured");
            return DeliveryReport::default();
        }

        let email = async {
            match &plan.email_to {
                Some(to) => Some(self.send_email(kind, shop, to).await),
                None => None,
            }
        };
        let slack = async {
            match &plan.slack_url {
                Some(url) => Some(self.send_slack(kind, shop, url).await),
                None => None,
            }
        };
        let (email, slack) = tokio::join!(email, slack);

        if let Some(ok) = email {
            record_notification(kind.as_str(), "email", ok);
        }
        if let Some(ok) = slack {
            record_notification(kind.as_str(), "slack", ok);
        }

        DeliveryReport::new(email.unwrap_or(false), slack.unwrap_or(false))
    }
}

/// Slack incoming-webhook payload
fn build_slack_payload(kind: NotificationKind, shop: &str) -> serde_json::Value {
    json!({ "text": templates::render_slack_text(kind, shop) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kinds: Vec<AlertKind>, slack_enabled: bool) -> NotificationChannelConfig {
        NotificationChannelConfig {
            alert_email: Some("owner@example.com".to_string()),
            slack_webhook_url: Some("https://hooks.slack.com/services/T/B/X".to_string()),
            slack_enabled,
            enabled_kinds: kinds,
        }
    }

    #[test]
    fn test_notification_kind_keys() {
        assert_eq!(
            NotificationKind::from_key("emailTest"),
            Some(NotificationKind::EmailTest)
        );
        assert_eq!(
            NotificationKind::from_key("trafficRateLow"),
            Some(NotificationKind::Alert(AlertKind::TrafficRateLow))
        );
        assert_eq!(NotificationKind::from_key("weeklyDigest"), None);
    }

    #[test]
    fn test_plan_both_channels() {
        let plan = plan_channels(
            NotificationKind::Alert(AlertKind::OrderGrowthLow),
            &config(vec![AlertKind::OrderGrowthLow], true),
        );
        assert_eq!(plan.email_to.as_deref(), Some("owner@example.com"));
        assert!(plan.slack_url.is_some());
    }

    #[test]
    fn test_plan_email_only_when_slack_disabled() {
        let plan = plan_channels(
            NotificationKind::Alert(AlertKind::OrderGrowthLow),
            &config(vec![AlertKind::OrderGrowthLow], false),
        );
        assert!(plan.email_to.is_some());
        assert!(plan.slack_url.is_none());
    }

    #[test]
    fn test_plan_disabled_kind_goes_nowhere() {
        let plan = plan_channels(
            NotificationKind::Alert(AlertKind::TrafficRateLow),
            &config(vec![AlertKind::OrderGrowthLow], true),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_email_test_never_uses_slack() {
        let plan = plan_channels(NotificationKind::EmailTest, &config(vec![], true));
        assert_eq!(plan.email_to.as_deref(), Some("owner@example.com"));
        assert!(plan.slack_url.is_none());

        let no_email = NotificationChannelConfig {
            alert_email: None,
            ..config(AlertKind::ALL.to_vec(), true)
        };
        assert!(plan_channels(NotificationKind::EmailTest, &no_email).is_empty());
    }

    #[test]
    fn test_delivery_report_partial_success() {
        assert!(DeliveryReport::new(true, false).sent);
        assert!(DeliveryReport::new(false, true).sent);
        assert!(!DeliveryReport::new(false, false).sent);
    }

    #[test]
    fn test_build_slack_payload() {
        let payload = build_slack_payload(
            NotificationKind::Alert(AlertKind::ConversionRateLow),
            "acme.myshopify.com",
        );
        let text = payload["text"].as_str().unwrap();
        assert!(text.contains("*acme.myshopify.com*"));
        assert!(text.starts_with("🚨 Low Conversion Rate"));
    }

    #[tokio::test]
    async fn test_unconfigured_notifier_reports_nothing_sent() {
        let notifier = AlertNotifier::new(None, Duration::from_secs(1)).unwrap();
        let cfg = NotificationChannelConfig {
            slack_webhook_url: None,
            ..config(AlertKind::ALL.to_vec(), false)
        };

        let report = notifier
            .send(NotificationKind::Alert(AlertKind::RevenueRateLow), "s.myshopify.com", &cfg)
            .await;
        assert_eq!(report, DeliveryReport::default());
    }
}
