//! Storefront sessions reported by the web pixel.
//!
//! One row per pixel session id. Later events for the same session bump the
//! page view count or mark the checkout as started; the creation time never
//! moves, so a session is counted in the window it started in.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use super::format_event_date;

/// Pixel events that change a session record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEvent {
    PageViewed,
    CheckoutStarted,
    /// Any other standard event; only opens the session
    Other,
}

impl PixelEvent {
    pub fn from_name(name: &str) -> Self {
        match name {
            "page_viewed" => PixelEvent::PageViewed,
            "checkout_started" => PixelEvent::CheckoutStarted,
            _ => PixelEvent::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub id: String,
    pub shop: String,
    pub pixel_session_id: String,
    pub page_views: i64,
    pub has_initiated_checkout: bool,
    pub created_at: String,
}

impl CheckoutSession {
    /// Open the session on its first event, fold later events into it
    pub async fn record_event(
        db: &SqlitePool,
        shop: &str,
        pixel_session_id: &str,
        event: PixelEvent,
        at: DateTime<Utc>,
    ) -> Result<CheckoutSession, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO checkout_sessions
                (id, shop, pixel_session_id, page_views, has_initiated_checkout, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(pixel_session_id) DO UPDATE SET
                page_views = page_views + excluded.page_views,
                has_initiated_checkout = has_initiated_checkout OR excluded.has_initiated_checkout
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(shop)
        .bind(pixel_session_id)
        .bind(i64::from(event == PixelEvent::PageViewed))
        .bind(event == PixelEvent::CheckoutStarted)
        .bind(format_event_date(at))
        .execute(db)
        .await?;

        sqlx::query_as(
            r#"
            SELECT id, shop, pixel_session_id, page_views, has_initiated_checkout, created_at
            FROM checkout_sessions WHERE pixel_session_id = ?
            "#,
        )
        .bind(pixel_session_id)
        .fetch_one(db)
        .await
    }

    /// Count sessions started with `from <= created_at < to`,
    /// or `from <= created_at <= to` when `inclusive_end` is set
    pub async fn count_in_range(
        db: &SqlitePool,
        shop: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        inclusive_end: bool,
    ) -> Result<i64, sqlx::Error> {
        let upper = if inclusive_end { "<=" } else { "<" };
        let sql = format!(
            "SELECT COUNT(*) FROM checkout_sessions WHERE shop = ? AND created_at >= ? AND created_at {} ?",
            upper
        );

        sqlx::query_scalar(&sql)
            .bind(shop)
            .bind(format_event_date(from))
            .bind(format_event_date(to))
            .fetch_one(db)
            .await
    }
}
