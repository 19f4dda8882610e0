pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod notifications;
pub mod sources;

pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::{AlertDispatcher, DispatcherOptions, SqliteFlagStore};
use crate::notifications::{AlertNotifier, SmtpMailer};
use crate::sources::{
    CheckoutSessionSource, ShopMetricSource, ShopifyOrderSource, TrafficSessionSource,
};

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub dispatcher: Arc<AlertDispatcher>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, dispatcher: Arc<AlertDispatcher>) -> Self {
        Self {
            config,
            db,
            dispatcher,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Wire the production metric sources, flag store and notifier into a dispatcher
pub fn build_dispatcher(config: &Config, db: DbPool) -> anyhow::Result<AlertDispatcher> {
    let orders = ShopifyOrderSource::new(db.clone(), &config.shopify)?;
    let traffic = TrafficSessionSource::new(db.clone());
    let checkouts = CheckoutSessionSource::new(db.clone());

    let mailer = SmtpMailer::from_config(&config.email);
    if mailer.is_none() {
        tracing::warn!("SMTP not configured, alert emails will not be sent");
    }
    let notifier = AlertNotifier::new(
        mailer,
        Duration::from_secs(config.alerts.send_timeout_secs),
    )?;

    Ok(AlertDispatcher::new(
        db.clone(),
        Arc::new(ShopMetricSource::new(orders, traffic, checkouts)),
        Arc::new(SqliteFlagStore::new(db)),
        Arc::new(notifier),
        DispatcherOptions::from_config(&config.alerts),
    ))
}
