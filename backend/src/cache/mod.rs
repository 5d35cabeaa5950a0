//! # TTL Cache
//!
//! Keyed read-through cache with a fixed time-to-live, used for values
//! that change slowly but are expensive to fetch (asset prices, market
//! interest rates).
//!
//! ## Contract
//!
//! - An entry is fresh while `now - fetched_at < ttl`. Fresh entries are
//!   served without calling the fetcher.
//! - Entries are written only by a successful fetch. A failed fetch leaves
//!   any previous entry in place.
//! - Batch lookups fetch the stale subset in one call and store every
//!   result with one timestamp, taken when the lookup started.
//! - No eviction. The key space is the small fixed set of assets/markets.
//!
//! The map lock is never held across a fetch, so concurrent misses for the
//! same key may fetch twice. The last write wins, value and timestamp
//! together.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock(std::sync::Mutex<DateTime<Utc>>);

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(std::sync::Mutex::new(start))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now = *now + chrono::Duration::from_std(by).unwrap();
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// A cached value and when it was fetched.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    /// True while the entry is younger than `ttl` at `now`.
    ///
    /// An entry stamped in the future (clock stepped backwards) counts as
    /// fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        (now - self.fetched_at)
            .to_std()
            .map(|age| age < ttl)
            .unwrap_or(true)
    }
}

/// Keyed cache with a per-instance TTL.
///
/// ## Usage
///
/// ```rust,ignore
/// let cache: TtlCache<String, f64> = TtlCache::new(Duration::from_secs(60));
///
/// let price = cache
///     .get_or_fetch("solana".to_string(), || async { fetch_price("solana").await })
///     .await?;
/// ```
pub struct TtlCache<K, V> {
    entries: Arc<RwLock<HashMap<K, CacheEntry<V>>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    /// Create a cache backed by the system clock.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            clock,
        }
    }

    /// Value for `key`, calling `fetcher` only when there is no fresh entry.
    ///
    /// ## Returns
    ///
    /// The cached or freshly fetched value, or the fetcher's error (in which
    /// case the cache is unchanged).
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetcher: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let now = self.clock.now();

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                if entry.is_fresh(now, self.ttl) {
                    debug!("Cache hit for {:?}", key);
                    return Ok(entry.value.clone());
                }
            }
        }

        debug!("Cache miss for {:?}", key);
        let value = fetcher().await?;

        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                fetched_at: now,
            },
        );

        Ok(value)
    }

    /// Values for many keys, fetching every stale or missing key in one call.
    ///
    /// `fetcher` receives the stale subset in request order and returns
    /// whatever values it could resolve. Keys it leaves out keep their
    /// previous entry, stale or not, and are absent from the result when
    /// they never had one.
    ///
    /// ## Returns
    ///
    /// A map from each requested key that has a value to that value. If the
    /// fetcher fails, nothing is written and the error is returned.
    pub async fn get_or_fetch_many<F, Fut, E>(
        &self,
        keys: &[K],
        fetcher: F,
    ) -> Result<HashMap<K, V>, E>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = Result<HashMap<K, V>, E>>,
    {
        let now = self.clock.now();

        let stale: Vec<K> = {
            let entries = self.entries.read().await;
            let mut stale = Vec::new();
            for key in keys {
                let fresh = entries
                    .get(key)
                    .map(|entry| entry.is_fresh(now, self.ttl))
                    .unwrap_or(false);
                if !fresh && !stale.contains(key) {
                    stale.push(key.clone());
                }
            }
            stale
        };

        if !stale.is_empty() {
            debug!("Cache refresh for {} of {} keys: {:?}", stale.len(), keys.len(), stale);
            let fetched = fetcher(stale).await?;

            let mut entries = self.entries.write().await;
            for (key, value) in fetched {
                entries.insert(key, CacheEntry { value, fetched_at: now });
            }
        }

        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| entries.get(key).map(|e| (key.clone(), e.value.clone())))
            .collect())
    }

    #[cfg(test)]
    pub async fn peek(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries.read().await.get(key).cloned()
    }
}
