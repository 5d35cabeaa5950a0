//! # Price Feed
//!
//! USD quotes by price-service asset id (`"solana"`, `"usd-coin"`...),
//! cached per id for `PRICE_CACHE_TTL_SECS`.
//!
//! ```text
//! ids ──► TtlCache (fresh ids served) ──► stale ids ──► one PriceSource call
//! ```
//!
//! Ids the price service does not know are dropped from the answer. A
//! request where nothing resolves is a validation error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::errors::ServiceError;

/// Request timeout for the price service.
const PRICE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Anything that can quote USD prices for a set of asset ids.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Prices for `ids`; unknown ids are simply absent from the map.
    async fn fetch_prices(&self, ids: &[String]) -> Result<HashMap<String, f64>, ServiceError>;
}

#[derive(Deserialize, Debug)]
struct UsdQuote {
    usd: Option<f64>,
}

/// CoinGecko `simple/price` client.
#[derive(Clone)]
pub struct CoinGeckoSource {
    client: Client,
    base_url: String,
}

impl CoinGeckoSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(PRICE_REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn fetch_prices(&self, ids: &[String]) -> Result<HashMap<String, f64>, ServiceError> {
        let url = format!("{}/simple/price", self.base_url);
        let joined = ids.join(",");

        let response = self
            .client
            .get(&url)
            .query(&[("ids", joined.as_str()), ("vs_currencies", "usd")])
            .send()
            .await
            .map_err(|e| ServiceError::PriceService(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::PriceService(format!(
                "price service answered {}",
                response.status()
            )));
        }

        let body: HashMap<String, UsdQuote> = response
            .json()
            .await
            .map_err(|e| ServiceError::PriceService(e.to_string()))?;

        Ok(body
            .into_iter()
            .filter_map(|(id, quote)| quote.usd.map(|price| (id, price)))
            .collect())
    }
}

/// Cached price lookups.
///
/// ## Usage
///
/// ```rust,ignore
/// let feed = PriceFeed::new(Arc::new(CoinGeckoSource::new(&config.price_api_url)), ttl);
/// let prices = feed.get_prices(&["solana".to_string()]).await?;
/// ```
#[derive(Clone)]
pub struct PriceFeed {
    source: Arc<dyn PriceSource>,
    cache: Arc<TtlCache<String, f64>>,
}

impl PriceFeed {
    pub fn new(source: Arc<dyn PriceSource>, ttl: Duration) -> Self {
        Self::with_cache(source, TtlCache::new(ttl))
    }

    pub fn with_cache(source: Arc<dyn PriceSource>, cache: TtlCache<String, f64>) -> Self {
        Self {
            source,
            cache: Arc::new(cache),
        }
    }

    /// USD prices for `ids`, in request order, duplicates removed.
    ///
    /// ## Returns
    ///
    /// * `Ok(Vec<(id, price)>)` - Every id that resolved
    /// * `Err(ServiceError::InvalidInput)` - No ids, or none of them resolved
    /// * `Err(ServiceError::PriceService)` - The price service failed
    pub async fn get_prices(&self, ids: &[String]) -> Result<Vec<(String, f64)>, ServiceError> {
        if ids.is_empty() {
            return Err(ServiceError::InvalidInput("ID is required".to_string()));
        }

        let source = self.source.clone();
        let prices = self
            .cache
            .get_or_fetch_many(ids, |stale| async move {
                debug!("Fetching {} prices", stale.len());
                source.fetch_prices(&stale).await
            })
            .await?;

        let mut resolved: Vec<(String, f64)> = Vec::with_capacity(ids.len());
        for id in ids {
            if resolved.iter().any(|(seen, _)| seen == id) {
                continue;
            }
            match prices.get(id) {
                Some(price) => resolved.push((id.clone(), *price)),
                None => warn!("No price for id: {}", id),
            }
        }

        if resolved.is_empty() {
            return Err(ServiceError::InvalidInput("Invalid ID".to_string()));
        }

        Ok(resolved)
    }

    /// Price of a single id.
    pub async fn get_price(&self, id: &str) -> Result<f64, ServiceError> {
        let prices = self.get_prices(&[id.to_string()]).await?;
        prices
            .into_iter()
            .next()
            .map(|(_, price)| price)
            .ok_or_else(|| ServiceError::InvalidInput("Invalid ID".to_string()))
    }
}

/// Split the comma separated `ids` query parameter, dropping blanks.
pub fn parse_price_ids(param: Option<&str>) -> Vec<String> {
    param
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
