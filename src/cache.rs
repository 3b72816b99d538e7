//! Per-symbol result cache
//!
//! Every detector keeps the result of its last scan for each symbol so that
//! query helpers (`get_active`, `get_unfilled`, ...) can be answered without a
//! new scan. The cache is an explicit value injected into the detector; its
//! [`CachePolicy`] decides when an entry stops being fresh.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Freshness and size policy for a [`SymbolCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Entries older than this are treated as absent. `None` keeps entries
    /// until they are replaced by the next scan.
    #[serde(with = "ttl_secs")]
    pub ttl:         Option<Duration>,
    /// Maximum number of symbols kept. The oldest entry is evicted first.
    pub max_symbols: Option<usize>,
}

impl CachePolicy {
    /// Keep every symbol's last result forever (last write wins)
    pub const fn unbounded() -> Self {
        Self { ttl: None, max_symbols: None }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_max_symbols(mut self, max: usize) -> Self {
        self.max_symbols = Some(max);
        self
    }
}

mod ttl_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match ttl {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        match secs {
            Some(s) if s.is_finite() && s >= 0.0 => Ok(Some(Duration::from_secs_f64(s))),
            Some(_) => Err(serde::de::Error::custom("ttl must be a non-negative number of seconds")),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value:       T,
    inserted_at: Instant,
}

/// Last-result cache keyed by symbol
#[derive(Debug, Clone)]
pub struct SymbolCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
    policy:  CachePolicy,
}

impl<T> Default for SymbolCache<T> {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

impl<T> SymbolCache<T> {
    pub fn new(policy: CachePolicy) -> Self {
        Self { entries: HashMap::new(), policy }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Replace the entry for `symbol`
    pub fn insert(&mut self, symbol: &str, value: T) {
        self.insert_at(symbol, value, Instant::now());
    }

    /// Fresh entry for `symbol`, if any
    pub fn get(&self, symbol: &str) -> Option<&T> {
        self.get_at(symbol, Instant::now())
    }

    /// True if `symbol` has an entry that has not expired
    pub fn is_fresh(&self, symbol: &str) -> bool {
        self.get(symbol).is_some()
    }

    pub fn remove(&mut self, symbol: &str) -> Option<T> {
        self.entries.remove(symbol).map(|e| e.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry that is expired at `now`
    pub fn purge_expired(&mut self, now: Instant) {
        if let Some(ttl) = self.policy.ttl {
            self.entries
                .retain(|_, e| now.saturating_duration_since(e.inserted_at) <= ttl);
        }
    }

    pub(crate) fn insert_at(&mut self, symbol: &str, value: T, now: Instant) {
        self.entries
            .insert(symbol.to_string(), CacheEntry { value, inserted_at: now });

        if let Some(max) = self.policy.max_symbols {
            while self.entries.len() > max.max(1) {
                let oldest = self
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(key) => {
                        tracing::trace!(symbol = %key, "evicting cached result");
                        self.entries.remove(&key);
                    },
                    None => break,
                }
            }
        }
    }

    pub(crate) fn get_at(&self, symbol: &str, now: Instant) -> Option<&T> {
        let entry = self.entries.get(symbol)?;
        match self.policy.ttl {
            Some(ttl) if now.saturating_duration_since(entry.inserted_at) > ttl => None,
            _ => Some(&entry.value),
        }
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let mut cache = SymbolCache::default();
        cache.insert("EURUSD", 1);
        cache.insert("EURUSD", 2);
        assert_eq!(cache.get("EURUSD"), Some(&2));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("GBPUSD").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = SymbolCache::new(CachePolicy::unbounded().with_ttl(Duration::from_secs(5)));
        let t0 = Instant::now();
        cache.insert_at("EURUSD", vec![1, 2], t0);

        assert!(cache.get_at("EURUSD", t0 + Duration::from_secs(4)).is_some());
        assert!(cache.get_at("EURUSD", t0 + Duration::from_secs(6)).is_none());

        cache.purge_expired(t0 + Duration::from_secs(6));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_max_symbols_evicts_oldest() {
        let mut cache = SymbolCache::new(CachePolicy::unbounded().with_max_symbols(2));
        let t0 = Instant::now();
        cache.insert_at("A", 1, t0);
        cache.insert_at("B", 2, t0 + Duration::from_millis(1));
        cache.insert_at("C", 3, t0 + Duration::from_millis(2));

        assert_eq!(cache.len(), 2);
        assert!(cache.get_at("A", t0).is_none());
        assert_eq!(cache.get_at("C", t0), Some(&3));
    }

    #[test]
    fn test_policy_serde() {
        let policy: CachePolicy = serde_json::from_str(r#"{"ttl": 2.5, "max_symbols": 10}"#).unwrap();
        assert_eq!(policy.ttl, Some(Duration::from_millis(2500)));
        assert_eq!(policy.max_symbols, Some(10));

        let empty: CachePolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, CachePolicy::unbounded());

        assert!(serde_json::from_str::<CachePolicy>(r#"{"ttl": -1}"#).is_err());
    }
}
