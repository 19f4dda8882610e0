//! Order metrics from the Shopify Admin GraphQL API.
//!
//! Order totals page through `orders` with a `created_at` search filter and
//! sum `totalPriceSet.shopMoney.amount`; order counts use `ordersCount`.
//! The offline access token is read from the shop session table.

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::ShopifyConfig;
use crate::db::ShopSession;
use crate::engine::AlertError;
use crate::DbPool;

use super::Window;

const ORDER_TOTALS_QUERY: &str = r#"
query OrderTotals($first: Int!, $after: String, $query: String) {
  orders(first: $first, after: $after, query: $query) {
    edges {
      node {
        totalPriceSet {
          shopMoney {
            amount
          }
        }
      }
    }
    pageInfo {
      hasNextPage
      endCursor
    }
  }
}
"#;

const ORDERS_COUNT_QUERY: &str = r#"
query OrdersCount($query: String) {
  ordersCount(query: $query) {
    count
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct OrdersData {
    orders: OrderConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderConnection {
    edges: Vec<OrderEdge>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct OrderEdge {
    node: OrderNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderNode {
    total_price_set: MoneyBag,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoneyBag {
    shop_money: Money,
}

#[derive(Debug, Deserialize)]
struct Money {
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrdersCountData {
    orders_count: Count,
}

#[derive(Debug, Deserialize)]
struct Count {
    count: u64,
}

/// Admin API search filter selecting orders created inside the window
fn created_at_filter(window: &Window) -> String {
    let upper = if window.inclusive_end { "<=" } else { "<" };
    format!(
        "created_at:>={} created_at:{}{}",
        window.from.format("%Y-%m-%dT%H:%M:%SZ"),
        upper,
        window.to.format("%Y-%m-%dT%H:%M:%SZ"),
    )
}

/// Sum the shop-currency amounts of one page of orders
fn sum_page(connection: &OrderConnection) -> Result<f64, AlertError> {
    connection.edges.iter().try_fold(0.0, |acc, edge| {
        let amount = &edge.node.total_price_set.shop_money.amount;
        amount
            .parse::<f64>()
            .map(|value| acc + value)
            .map_err(|_| AlertError::Fetch(format!("invalid order amount: {}", amount)))
    })
}

/// Unwrap a GraphQL envelope, treating top-level errors as fetch failures
fn into_data<T>(response: GraphQlResponse<T>) -> Result<T, AlertError> {
    if !response.errors.is_empty() {
        let messages = response
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(AlertError::Fetch(format!("Admin API: {}", messages)));
    }
    response
        .data
        .ok_or_else(|| AlertError::Fetch("Admin API returned no data".to_string()))
}

/// Order totals and counts for a shop over the Admin API
#[derive(Clone)]
pub struct ShopifyOrderSource {
    db: DbPool,
    http: reqwest::Client,
    api_version: String,
    page_size: u32,
    max_pages: u32,
}

impl ShopifyOrderSource {
    pub fn new(db: DbPool, config: &ShopifyConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            db,
            http,
            api_version: config.api_version.clone(),
            page_size: config.page_size,
            max_pages: config.max_pages,
        })
    }

    fn endpoint(&self, shop: &str) -> String {
        format!(
            "https://{}/admin/api/{}/graphql.json",
            shop, self.api_version
        )
    }

    async fn access_token(&self, shop: &str) -> Result<String, AlertError> {
        ShopSession::get_access_token(&self.db, shop)
            .await
            .map_err(|e| AlertError::Fetch(format!("session store: {}", e)))?
            .ok_or_else(|| {
                AlertError::Configuration(format!("No Admin API access token for {}", shop))
            })
    }

    async fn graphql<T: serde::de::DeserializeOwned>(
        &self,
        shop: &str,
        token: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, AlertError> {
        let response: GraphQlResponse<T> = self
            .http
            .post(self.endpoint(shop))
            .header("X-Shopify-Access-Token", token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        into_data(response)
    }

    pub async fn order_totals(&self, shop: &str, window: Window) -> Result<f64, AlertError> {
        let token = self.access_token(shop).await?;
        let filter = created_at_filter(&window);

        let mut total = 0.0;
        let mut after: Option<String> = None;

        for page in 0..self.max_pages {
            let data: OrdersData = self
                .graphql(
                    shop,
                    &token,
                    ORDER_TOTALS_QUERY,
                    json!({ "first": self.page_size, "after": after, "query": filter }),
                )
                .await?;

            total += sum_page(&data.orders)?;

            match data.orders.page_info.end_cursor {
                Some(cursor) if data.orders.page_info.has_next_page => after = Some(cursor),
                _ => return Ok(total),
            }

            tracing::trace!(shop = %shop, page = page, "Fetching next page of orders");
        }

        tracing::warn!(
            shop = %shop,
            max_pages = self.max_pages,
            "Order pagination limit reached, totals are truncated"
        );
        Ok(total)
    }

    pub async fn order_count(&self, shop: &str, window: Window) -> Result<u64, AlertError> {
        let token = self.access_token(shop).await?;
        let data: OrdersCountData = self
            .graphql(
                shop,
                &token,
                ORDERS_COUNT_QUERY,
                json!({ "query": created_at_filter(&window) }),
            )
            .await?;

        Ok(data.orders_count.count)
    }
}
