//! Database models: alert settings, traffic events, checkout sessions and shop sessions.

pub mod alert_settings;
pub mod checkout_session;
pub mod shop_session;
pub mod traffic_event;

pub use alert_settings::*;
pub use checkout_session::*;
pub use shop_session::*;
pub use traffic_event::*;
