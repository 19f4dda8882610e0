//! Prometheus metrics: HTTP traffic plus alert evaluation and delivery counters.

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{sync::Arc, time::Instant};

use crate::AppState;

pub const HTTP_REQUESTS_TOTAL: &str = "observa_http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "observa_http_request_duration_seconds";
pub const ALERT_EVALUATIONS_TOTAL: &str = "observa_alert_evaluations_total";
pub const ALERT_NOTIFICATIONS_TOTAL: &str = "observa_alert_notifications_total";

/// Install the global Prometheus recorder. Fails if a recorder is already installed.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "HTTP requests by method, route and status");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency");
    describe_counter!(
        ALERT_EVALUATIONS_TOTAL,
        "Alert kind evaluations by outcome"
    );
    describe_counter!(
        ALERT_NOTIFICATIONS_TOTAL,
        "Notification attempts by channel and result"
    );

    Ok(handle)
}

/// GET /metrics
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> Response {
    let Some(handle) = &state.metrics_handle else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}

/// Count and time every request, labelled by route template rather than raw path
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let route = match request.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_owned(),
        None => "unmatched".to_owned(),
    };
    let method = request.method().as_str().to_owned();

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed = started.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method.clone(), "route" => route.clone())
        .record(elapsed);
    counter!(HTTP_REQUESTS_TOTAL, "method" => method, "route" => route, "status" => status)
        .increment(1);

    response
}

/// Outcome of evaluating one alert kind: disabled, not_configured, failed,
/// notified, send_failed, reset or unchanged
pub fn record_evaluation(kind: &'static str, outcome: &'static str) {
    counter!(ALERT_EVALUATIONS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

/// One channel delivery attempt
pub fn record_notification(kind: &'static str, channel: &'static str, delivered: bool) {
    let result = if delivered { "delivered" } else { "failed" };
    counter!(ALERT_NOTIFICATIONS_TOTAL, "kind" => kind, "channel" => channel, "result" => result)
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_follow_prometheus_conventions() {
        for name in [
            HTTP_REQUESTS_TOTAL,
            ALERT_EVALUATIONS_TOTAL,
            ALERT_NOTIFICATIONS_TOTAL,
        ] {
            assert!(name.starts_with("observa_") && name.ends_with("_total"));
        }
        assert!(HTTP_REQUEST_DURATION_SECONDS.ends_with("_seconds"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_evaluation("orderGrowthLow", "notified");
        record_notification("emailTest", "email", false);
    }
}
