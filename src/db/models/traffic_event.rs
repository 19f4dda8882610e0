//! Storefront traffic events.
//!
//! The storefront tracking script posts one event per pageview. Event dates
//! are stored as fixed-width UTC RFC 3339 strings so that range queries can
//! compare them lexicographically.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A recorded storefront pageview
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrafficEvent {
    pub id: String,
    pub shop_domain: String,
    pub event_date: String,
    pub page_url: String,
    pub created_at: String,
}

/// Format a timestamp the way event dates are stored
pub fn format_event_date(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl TrafficEvent {
    /// Record a pageview
    pub async fn create(
        db: &SqlitePool,
        shop_domain: &str,
        event_date: DateTime<Utc>,
        page_url: &str,
    ) -> Result<TrafficEvent, sqlx::Error> {
        let event = TrafficEvent {
            id: uuid::Uuid::new_v4().to_string(),
            shop_domain: shop_domain.to_string(),
            event_date: format_event_date(event_date),
            page_url: page_url.to_string(),
            created_at: format_event_date(Utc::now()),
        };

        sqlx::query(
            r#"
            INSERT INTO traffic_events (id, shop_domain, event_date, page_url, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.shop_domain)
        .bind(&event.event_date)
        .bind(&event.page_url)
        .bind(&event.created_at)
        .execute(db)
        .await?;

        Ok(event)
    }

    /// Count events for a shop with `from <= event_date < to`,
    /// or `from <= event_date <= to` when `inclusive_end` is set
    pub async fn count_in_range(
        db: &SqlitePool,
        shop_domain: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        inclusive_end: bool,
    ) -> Result<i64, sqlx::Error> {
        let sql = if inclusive_end {
            "SELECT COUNT(*) FROM traffic_events WHERE shop_domain = ? AND event_date >= ? AND event_date <= ?"
        } else {
            "SELECT COUNT(*) FROM traffic_events WHERE shop_domain = ? AND event_date >= ? AND event_date < ?"
        };

        sqlx::query_scalar(sql)
            .bind(shop_domain)
            .bind(format_event_date(from))
            .bind(format_event_date(to))
            .fetch_one(db)
            .await
    }
}
