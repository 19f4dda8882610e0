//! Scheduled alert sweeps.
//!
//! A sweep runs `check_all` for every shop that has at least one alert kind
//! enabled, one shop after another. The background task fires the sweep on a
//! cron schedule; the cron endpoint runs the same sweep on demand.

use chrono::Utc;
use cron::Schedule;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::AlertsConfig;
use crate::db::AlertSettings;
use crate::DbPool;

use super::{AlertDispatcher, CheckAllResult};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub shops_checked: usize,
    pub alerts_sent: usize,
    /// Kinds that failed to evaluate, summed over all shops
    pub failures: usize,
    pub results: Vec<CheckAllResult>,
}

/// Check every shop with enabled alerts
pub async fn run_sweep(
    dispatcher: &AlertDispatcher,
    db: &DbPool,
) -> Result<SweepSummary, sqlx::Error> {
    let shops = AlertSettings::list_shops_with_enabled_alerts(db).await?;
    tracing::info!(shops = shops.len(), "Starting alert sweep");

    let mut summary = SweepSummary::default();
    for shop in shops {
        let result = dispatcher.check_all(&shop).await;
        let failed = result.alerts.failed_count();
        if failed > 0 {
            tracing::warn!(shop = %shop, failed = failed, "Some alerts could not be evaluated");
        }

        summary.shops_checked += 1;
        summary.alerts_sent += result.alerts.sent_count();
        summary.failures += failed;
        summary.results.push(result);
    }

    tracing::info!(
        shops_checked = summary.shops_checked,
        alerts_sent = summary.alerts_sent,
        failures = summary.failures,
        "Alert sweep completed"
    );
    Ok(summary)
}

/// Spawn the background task running sweeps on the configured schedule
pub fn spawn_alert_scheduler(
    dispatcher: Arc<AlertDispatcher>,
    db: DbPool,
    config: &AlertsConfig,
) {
    if !config.scheduler_enabled {
        tracing::info!("Scheduled alert checks are disabled");
        return;
    }

    let schedule = match Schedule::from_str(&config.schedule) {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::error!(
                schedule = %config.schedule,
                error = %e,
                "Invalid alert schedule, scheduled checks not started"
            );
            return;
        }
    };

    tracing::info!(schedule = %config.schedule, "Starting scheduled alert checks");

    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                tracing::warn!("Alert schedule has no upcoming run, stopping");
                return;
            };

            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tracing::debug!(next_run = %next, "Next alert sweep scheduled");
            tokio::time::sleep(wait).await;

            if let Err(e) = run_sweep(&dispatcher, &db).await {
                tracing::error!(error = %e, "Alert sweep failed");
            }
        }
    });
}
