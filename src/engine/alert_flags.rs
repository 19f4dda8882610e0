use async_trait::async_trait;

use crate::db::{AlertKind, AlertSettings};
use crate::DbPool;

use super::AlertError;

/// Persisted "already notified" flag per (shop, kind)
#[async_trait]
pub trait AlertFlagStore: Send + Sync {
    async fn get(&self, shop: &str, kind: AlertKind) -> Result<bool, AlertError>;

    /// Overwrite one flag. Last writer wins.
    async fn set(&self, shop: &str, kind: AlertKind, value: bool) -> Result<(), AlertError>;

    /// Clear every flag of a shop
    async fn reset_all(&self, shop: &str) -> Result<(), AlertError>;
}

/// Flags stored on the shop's alert settings row
#[derive(Clone)]
pub struct SqliteFlagStore {
    db: DbPool,
}

impl SqliteFlagStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

fn missing_settings(shop: &str) -> AlertError {
    AlertError::Configuration(format!("No alert settings for {}", shop))
}

#[async_trait]
impl AlertFlagStore for SqliteFlagStore {
    async fn get(&self, shop: &str, kind: AlertKind) -> Result<bool, AlertError> {
        let settings = AlertSettings::get(&self.db, shop)
            .await?
            .ok_or_else(|| missing_settings(shop))?;
        Ok(settings.is_notified(kind))
    }

    async fn set(&self, shop: &str, kind: AlertKind, value: bool) -> Result<(), AlertError> {
        if AlertSettings::set_notified(&self.db, shop, kind, value).await? {
            Ok(())
        } else {
            Err(missing_settings(shop))
        }
    }

    async fn reset_all(&self, shop: &str) -> Result<(), AlertError> {
        if AlertSettings::reset_notified(&self.db, shop).await? {
            Ok(())
        } else {
            Err(missing_settings(shop))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_in_memory;

    #[tokio::test]
    async fn test_flags_are_independent_per_kind() {
        let db = init_in_memory().await.unwrap();
        let shop = "flags.myshopify.com";
        AlertSettings::get_or_create(&db, shop).await.unwrap();

        let store = SqliteFlagStore::new(db);
        store.set(shop, AlertKind::TrafficRateLow, true).await.unwrap();

        assert!(store.get(shop, AlertKind::TrafficRateLow).await.unwrap());
        assert!(!store.get(shop, AlertKind::OrderGrowthLow).await.unwrap());

        store.reset_all(shop).await.unwrap();
        assert!(!store.get(shop, AlertKind::TrafficRateLow).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_row_is_configuration_error() {
        let db = init_in_memory().await.unwrap();
        let store = SqliteFlagStore::new(db);

        assert!(matches!(
            store.get("ghost.myshopify.com", AlertKind::RevenueRateLow).await,
            Err(AlertError::Configuration(_))
        ));
        assert!(matches!(
            store
                .set("ghost.myshopify.com", AlertKind::RevenueRateLow, true)
                .await,
            Err(AlertError::Configuration(_))
        ));
    }
}
