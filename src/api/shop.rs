use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use super::ApiError;

/// Header carrying the authenticated shop, set by the embedded-app auth layer
pub const SHOP_DOMAIN_HEADER: &str = "X-Shopify-Shop-Domain";

/// `name.myshopify.com`, lowercase letters, digits and dashes in the name
pub fn is_valid_shop_domain(shop: &str) -> bool {
    match shop.strip_suffix(".myshopify.com") {
        Some(name) => {
            !name.is_empty()
                && !name.starts_with('-')
                && name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        }
        None => false,
    }
}

/// Normalize a shop domain, rejecting anything that is not a myshopify.com host
pub fn parse_shop_domain(raw: &str) -> Option<String> {
    let shop = raw.trim().to_ascii_lowercase();
    is_valid_shop_domain(&shop).then_some(shop)
}

/// The shop the request acts for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShopDomain(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ShopDomain
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(SHOP_DOMAIN_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing shop domain"))?;

        parse_shop_domain(raw)
            .map(ShopDomain)
            .ok_or_else(|| ApiError::unauthorized("Invalid shop domain"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shop_domain_validation() {
        assert!(is_valid_shop_domain("acme-store.myshopify.com"));
        assert!(is_valid_shop_domain("shop42.myshopify.com"));
        assert!(!is_valid_shop_domain("myshopify.com"));
        assert!(!is_valid_shop_domain(".myshopify.com"));
        assert!(!is_valid_shop_domain("evil.com/x.myshopify.com"));
        assert!(!is_valid_shop_domain("acme.example.com"));
        assert!(!is_valid_shop_domain("a.b.myshopify.com"));
    }

    #[test]
    fn test_parse_normalizes_case() {
        assert_eq!(
            parse_shop_domain("  Acme.MyShopify.com "),
            Some("acme.myshopify.com".to_string())
        );
        assert_eq!(parse_shop_domain("localhost:8080"), None);
    }
}
