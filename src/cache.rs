//! Best-effort key/value cache for read-heavy aggregates.
//!
//! The cache is never a source of truth. A disabled client turns every call into a no-op,
//! and writers invalidate by key prefix (`account:{id}:`, `event:{id}:`) after their unit
//! of work commits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Shared handle to the in-process cache.
///
/// Cloning is cheap; all clones see the same entries.
#[derive(Debug, Clone, Default)]
pub struct CacheClient {
    store: Option<Arc<RwLock<HashMap<String, CacheEntry>>>>,
    default_ttl: Duration,
}

impl CacheClient {
    /// Creates an enabled cache whose entries live for `default_ttl` unless overridden.
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            store: Some(Arc::new(RwLock::new(HashMap::new()))),
            default_ttl,
        }
    }

    /// A cache that stores nothing and always misses.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether the client is backed by a store.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Returns the live value for `key`, dropping it if it has expired.
    pub async fn get(&self, key: &str) -> Option<String> {
        let store = self.store.as_ref()?;
        let now = Instant::now();
        {
            let reader = store.read().await;
            match reader.get(key) {
                Some(entry) if entry.expires_at > now => {
                    trace!(key, "Cache hit");
                    return Some(entry.value.clone());
                }
                None => return None,
                Some(_) => {}
            }
        }
        store.write().await.remove(key);
        trace!(key, "Cache entry expired");
        None
    }

    /// Stores `value` under `key` with the default TTL.
    pub async fn set(&self, key: &str, value: String) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    /// Stores `value` under `key` for `ttl`.
    pub async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        store.write().await.insert(key.to_string(), entry);
    }

    /// Removes a single key.
    pub async fn delete(&self, key: &str) {
        if let Some(store) = self.store.as_ref() {
            store.write().await.remove(key);
        }
    }

    /// Removes every key starting with `prefix`; returns how many were removed.
    pub async fn delete_prefix(&self, prefix: &str) -> usize {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        let mut writer = store.write().await;
        let before = writer.len();
        writer.retain(|key, _| !key.starts_with(prefix));
        let removed = before - writer.len();
        if removed > 0 {
            debug!(prefix, removed, "Invalidated cache entries");
        }
        removed
    }

    /// Drops everything cached for the given accounts.
    pub async fn invalidate_accounts(&self, account_ids: &[i64]) {
        for id in account_ids {
            self.delete_prefix(&account_key_prefix(*id)).await;
        }
    }

    /// Drops everything cached for an event.
    pub async fn invalidate_event(&self, event_id: i64) {
        self.delete_prefix(&event_key_prefix(event_id)).await;
    }
}

/// Key prefix under which per-account aggregates are cached.
#[must_use]
pub fn account_key_prefix(account_id: i64) -> String {
    format!("account:{account_id}:")
}

/// Key prefix under which per-event aggregates are cached.
#[must_use]
pub fn event_key_prefix(event_id: i64) -> String {
    format!("event:{event_id}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = CacheClient::new(Duration::from_secs(60));
        cache.set("account:1:summary", "a".to_string()).await;
        assert_eq!(cache.get("account:1:summary").await.as_deref(), Some("a"));

        cache.delete("account:1:summary").await;
        assert!(cache.get("account:1:summary").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_miss() {
        let cache = CacheClient::new(Duration::from_secs(60));
        cache
            .set_with_ttl("event:3:guests", "x".to_string(), Duration::ZERO)
            .await;
        assert!(cache.get("event:3:guests").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_prefix_only_touches_matching_keys() {
        let cache = CacheClient::new(Duration::from_secs(60));
        cache.set("account:1:summary", "a".to_string()).await;
        cache.set("account:1:history", "b".to_string()).await;
        cache.set("account:12:summary", "c".to_string()).await;

        cache.invalidate_accounts(&[1]).await;

        assert!(cache.get("account:1:summary").await.is_none());
        assert!(cache.get("account:1:history").await.is_none());
        assert_eq!(cache.get("account:12:summary").await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_disabled_cache_is_a_no_op() {
        let cache = CacheClient::disabled();
        assert!(!cache.is_enabled());
        cache.set("account:1:summary", "a".to_string()).await;
        assert!(cache.get("account:1:summary").await.is_none());
        assert_eq!(cache.delete_prefix("account:").await, 0);
    }
}
