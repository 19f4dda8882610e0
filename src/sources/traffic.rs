use crate::db::{CheckoutSession, TrafficEvent};
use crate::engine::AlertError;
use crate::DbPool;

use super::Window;

/// Session counts backed by the recorded storefront traffic events
#[derive(Clone)]
pub struct TrafficSessionSource {
    db: DbPool,
}

impl TrafficSessionSource {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn session_count(&self, shop: &str, window: Window) -> Result<u64, AlertError> {
        let count =
            TrafficEvent::count_in_range(&self.db, shop, window.from, window.to, window.inclusive_end)
                .await
                .map_err(|e| AlertError::Fetch(format!("traffic store: {}", e)))?;

        Ok(count.max(0) as u64)
    }
}

/// Session counts backed by the web pixel's checkout sessions
#[derive(Clone)]
pub struct CheckoutSessionSource {
    db: DbPool,
}

impl CheckoutSessionSource {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn session_count(&self, shop: &str, window: Window) -> Result<u64, AlertError> {
        let count = CheckoutSession::count_in_range(
            &self.db,
            shop,
            window.from,
            window.to,
            window.inclusive_end,
        )
        .await
        .map_err(|e| AlertError::Fetch(format!("checkout session store: {}", e)))?;

        Ok(count.max(0) as u64)
    }
}
