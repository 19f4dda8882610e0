//! Admin API sessions.
//!
//! The embedded-app auth layer owns this table; the alerting side only reads
//! the offline access token it needs for Admin API order queries.

use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ShopSession {
    pub shop: String,
    pub access_token: String,
    pub scope: Option<String>,
    pub updated_at: String,
}

impl ShopSession {
    /// Get the Admin API access token for a shop
    pub async fn get_access_token(
        db: &SqlitePool,
        shop: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT access_token FROM shop_sessions WHERE shop = ?")
            .bind(shop)
            .fetch_optional(db)
            .await
    }

    /// Store or replace the session for a shop
    pub async fn upsert(
        db: &SqlitePool,
        shop: &str,
        access_token: &str,
        scope: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO shop_sessions (shop, access_token, scope, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(shop) DO UPDATE SET
                access_token = excluded.access_token,
                scope = excluded.scope,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(shop)
        .bind(access_token)
        .bind(scope)
        .bind(&now)
        .execute(db)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_in_memory;

    #[tokio::test]
    async fn test_access_token_lookup() {
        let db = init_in_memory().await.unwrap();

        assert_eq!(
            ShopSession::get_access_token(&db, "a.myshopify.com").await.unwrap(),
            None
        );

        ShopSession::upsert(&db, "a.myshopify.com", "shpat_1", Some("read_orders"))
            .await
            .unwrap();
        ShopSession::upsert(&db, "a.myshopify.com", "shpat_2", None)
            .await
            .unwrap();

        assert_eq!(
            ShopSession::get_access_token(&db, "a.myshopify.com")
                .await
                .unwrap()
                .as_deref(),
            Some("shpat_2")
        );
    }
}
