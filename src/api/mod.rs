mod alerts;
mod cron;
pub mod error;
pub mod metrics;
mod settings;
mod shop;
mod traffic;

pub use error::ApiError;
pub use shop::{is_valid_shop_domain, parse_shop_domain, ShopDomain, SHOP_DOMAIN_HEADER};

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Shop-scoped routes, shop taken from the auth layer's header
    let shop_routes = Router::new()
        .route(
            "/alerts/check",
            get(alerts::check_alerts).post(alerts::check_alerts),
        )
        .route("/alerts/reset-flags", post(alerts::reset_flags))
        .route("/alerts/trigger", post(alerts::trigger_alert))
        .route(
            "/alerts/test-email",
            get(alerts::test_email).post(alerts::test_email),
        )
        .route("/alerts/flags/:kind", put(alerts::set_flag))
        .route(
            "/settings",
            get(settings::get_settings).put(settings::update_settings),
        );

    // Posted cross-origin by the storefront script and the web pixel
    let tracking_routes = Router::new()
        .route("/track-traffic", post(traffic::track_traffic))
        .route("/pixel-payload", post(traffic::pixel_payload))
        .layer(CorsLayer::permissive());

    // Bearer token checked in the handler
    let cron_routes = Router::new().route("/cron/alerts", get(cron::run_cron_alerts));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/api", shop_routes.merge(tracking_routes).merge(cron_routes))
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
