//! Response cache keyed by request fingerprint
//!
//! Entries expire a fixed TTL after insertion. The store is bounded: an
//! insert that would exceed the bound first sweeps expired entries, then
//! evicts the oldest insertions.
//!
//! Timing uses `tokio::time::Instant` so expiry can be tested with a paused
//! clock.

use crate::config::CacheConfig;
use crate::router::RequestProfile;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Payload stored for a successful, non-placeholder dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub result: String,
    pub provider: String,
    pub model: String,
    pub tokens: u32,
    pub is_self_hosted: bool,
}

#[derive(Debug)]
struct CacheEntry {
    response: CachedResponse,
    inserted_at: Instant,
}

/// Snapshot for the status surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_seconds: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Compute the cache key for a request
///
/// SHA-256 (hex) over task type, complexity, quality and the first
/// `prefix_chars` characters of the prompt.
pub fn fingerprint(profile: &RequestProfile, prefix_chars: usize) -> String {
    let prompt_prefix: String = profile.prompt().chars().take(prefix_chars).collect();

    let mut hasher = Sha256::new();
    hasher.update(profile.task_type().as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(profile.complexity().as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(profile.quality().as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(prompt_prefix.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct ResponseCache {
    enabled: bool,
    ttl: Duration,
    max_entries: usize,
    prefix_chars: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            ttl: Duration::from_secs(config.ttl_seconds),
            max_entries: config.max_entries,
            prefix_chars: config.fingerprint_prefix_chars,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fingerprint a profile with this cache's prefix length
    pub fn fingerprint(&self, profile: &RequestProfile) -> String {
        fingerprint(profile, self.prefix_chars)
    }

    /// Look up a live entry; expired entries are removed on the way
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        if !self.enabled {
            return None;
        }

        let mut entries = self.entries.lock();
        let found = match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        drop(entries);

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Store a response, evicting to stay within `max_entries`
    pub fn put(&self, key: String, response: CachedResponse) {
        if !self.enabled {
            return;
        }

        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let ttl = self.ttl;
            let before = entries.len();
            entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
            let swept = before - entries.len();

            let mut evicted = 0usize;
            while entries.len() >= self.max_entries {
                let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                entries.remove(&oldest);
                evicted += 1;
            }
            tracing::debug!(swept, evicted, "Response cache at capacity");
        }

        entries.insert(
            key,
            CacheEntry {
                response,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            entries: self.len(),
            max_entries: self.max_entries,
            ttl_seconds: self.ttl.as_secs(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Complexity, Quality, TaskType};

    fn cache(ttl_seconds: u64, max_entries: usize) -> ResponseCache {
        ResponseCache::new(&CacheConfig {
            enabled: true,
            ttl_seconds,
            max_entries,
            fingerprint_prefix_chars: 50_000,
        })
    }

    fn response(text: &str) -> CachedResponse {
        CachedResponse {
            result: text.to_string(),
            provider: "h100".to_string(),
            model: "mythomax".to_string(),
            tokens: 12,
            is_self_hosted: true,
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic_hex() {
        let profile = RequestProfile::new(TaskType::Code, "sort a list").unwrap();
        let a = fingerprint(&profile, 50_000);
        let b = fingerprint(&profile.clone(), 50_000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_covers_semantic_fields() {
        let base = RequestProfile::new(TaskType::Code, "sort a list").unwrap();
        let key = fingerprint(&base, 50_000);

        let other_task = RequestProfile::new(TaskType::Chat, "sort a list").unwrap();
        let other_complexity = base.clone().with_complexity(Complexity::High);
        let other_quality = base.clone().with_quality(Quality::Premium);

        assert_ne!(key, fingerprint(&other_task, 50_000));
        assert_ne!(key, fingerprint(&other_complexity, 50_000));
        assert_ne!(key, fingerprint(&other_quality, 50_000));
    }

    #[test]
    fn test_fingerprint_prefix_truncation() {
        let a = RequestProfile::new(TaskType::Chat, "same start, ending one").unwrap();
        let b = RequestProfile::new(TaskType::Chat, "same start, ending two").unwrap();
        assert_eq!(fingerprint(&a, 10), fingerprint(&b, 10));
        assert_ne!(fingerprint(&a, 50_000), fingerprint(&b, 50_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = cache(300, 10);
        cache.put("k".to_string(), response("hello"));
        assert_eq!(cache.get("k"), Some(response("hello")));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get("k").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let cache = cache(300, 2);
        cache.put("a".to_string(), response("a"));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.put("b".to_string(), response("b"));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.put("c".to_string(), response("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_sweeps_expired_before_evicting() {
        let cache = cache(10, 2);
        cache.put("old".to_string(), response("old"));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put("fresh".to_string(), response("fresh"));
        tokio::time::advance(Duration::from_secs(5)).await;

        // "old" is expired, "fresh" is not; only the expired one goes
        cache.put("new".to_string(), response("new"));
        assert!(cache.get("fresh").is_some());
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = cache(300, 1);
        cache.put("k".to_string(), response("one"));
        cache.put("k".to_string(), response("two"));
        assert_eq!(cache.get("k").unwrap().result, "two");
    }

    #[test]
    fn test_disabled_cache_is_noop() {
        let cache = ResponseCache::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.put("k".to_string(), response("x"));
        assert!(cache.get("k").is_none());
        assert!(!cache.stats().enabled);
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let cache = cache(300, 10);
        cache.put("k".to_string(), response("x"));
        cache.get("k");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.ttl_seconds, 300);
    }
}
