//! Process-local, TTL-based mirror of the exchange-rate table.
//!
//! One `refreshed_at` stamp covers the whole map: once the TTL elapses,
//! even present keys are reported invalid and the caller re-fetches the
//! full table. The table is tiny, so whole-map invalidation is cheaper
//! than tracking per-key freshness.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use wallet_sdk::objects::Currency;

/// Default time-to-live of a cached rate table.
pub const DEFAULT_RATES_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct Inner {
    rates: BTreeMap<String, Decimal>,
    refreshed_at: Option<Instant>,
}

/// Reader/writer cache of `"FROM_TO"` keys to rates.
#[derive(Debug)]
pub struct RatesCache {
    inner: RwLock<Inner>,
    ttl: Duration,
}

impl RatesCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                rates: BTreeMap::new(),
                refreshed_at: None,
            }),
            ttl,
        }
    }

    /// A defensive copy of the table plus its validity flag. The flag
    /// covers the whole map: it is true iff the last refresh is within
    /// the TTL.
    pub fn get_all(&self) -> (BTreeMap<String, Decimal>, bool) {
        let inner = self.inner.read().expect("rates cache lock poisoned");
        let valid = self.fresh(&inner);
        (inner.rates.clone(), valid)
    }

    /// A single pair. `None` when the table is stale or the key is absent.
    pub fn get_pair(&self, from: Currency, to: Currency) -> Option<Decimal> {
        let inner = self.inner.read().expect("rates cache lock poisoned");
        if !self.fresh(&inner) {
            return None;
        }
        inner.rates.get(&Currency::pair_key(from, to)).copied()
    }

    /// Atomically replace the table and stamp it fresh.
    pub fn set(&self, rates: BTreeMap<String, Decimal>) {
        let mut inner = self.inner.write().expect("rates cache lock poisoned");
        inner.rates = rates;
        inner.refreshed_at = Some(Instant::now());
    }

    /// Empty the table and reset the stamp.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("rates cache lock poisoned");
        inner.rates.clear();
        inner.refreshed_at = None;
    }

    /// Fresh and non-empty.
    pub fn is_valid(&self) -> bool {
        let inner = self.inner.read().expect("rates cache lock poisoned");
        self.fresh(&inner) && !inner.rates.is_empty()
    }

    fn fresh(&self, inner: &Inner) -> bool {
        inner
            .refreshed_at
            .is_some_and(|at| at.elapsed() <= self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rates() -> BTreeMap<String, Decimal> {
        let mut rates = BTreeMap::new();
        rates.insert("USD_EUR".to_string(), Decimal::new(92, 2));
        rates.insert("EUR_USD".to_string(), Decimal::new(109, 2));
        rates
    }

    #[test]
    fn set_then_get_returns_an_equal_table() {
        let cache = RatesCache::new(Duration::from_secs(60));
        cache.set(sample_rates());

        let (rates, valid) = cache.get_all();
        assert!(valid);
        assert_eq!(rates, sample_rates());
        assert!(cache.is_valid());
    }

    #[test]
    fn empty_cache_is_invalid() {
        let cache = RatesCache::new(Duration::from_secs(60));
        let (rates, valid) = cache.get_all();
        assert!(!valid);
        assert!(rates.is_empty());
        assert_eq!(cache.get_pair(Currency::USD, Currency::EUR), None);
    }

    #[test]
    fn expiry_invalidates_even_present_keys() {
        let cache = RatesCache::new(Duration::from_millis(30));
        cache.set(sample_rates());
        assert!(cache.get_pair(Currency::USD, Currency::EUR).is_some());

        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(cache.get_pair(Currency::USD, Currency::EUR), None);
        let (_, valid) = cache.get_all();
        assert!(!valid);
        assert!(!cache.is_valid());
    }

    #[test]
    fn missing_pair_within_ttl_is_none() {
        let cache = RatesCache::new(Duration::from_secs(60));
        cache.set(sample_rates());
        assert_eq!(cache.get_pair(Currency::USD, Currency::RUB), None);
    }

    #[test]
    fn clear_resets_the_table() {
        let cache = RatesCache::new(Duration::from_secs(60));
        cache.set(sample_rates());
        cache.clear();

        assert!(!cache.is_valid());
        let (rates, valid) = cache.get_all();
        assert!(!valid);
        assert!(rates.is_empty());
    }

    #[test]
    fn set_replaces_rather_than_merges() {
        let cache = RatesCache::new(Duration::from_secs(60));
        cache.set(sample_rates());

        let mut replacement = BTreeMap::new();
        replacement.insert("USD_RUB".to_string(), Decimal::new(955, 1));
        cache.set(replacement.clone());

        let (rates, valid) = cache.get_all();
        assert!(valid);
        assert_eq!(rates, replacement);
    }
}
