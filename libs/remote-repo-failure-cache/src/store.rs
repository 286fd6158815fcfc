use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::entry::FailureCacheEntry;
use crate::error::FailureStoreError;

/// Shared, durable key-value storage for failure entries.
///
/// Implementations must tolerate concurrent readers and writers across
/// processes. Overwrites are last-write-wins; no transaction spans a check and
/// a later write.
#[async_trait]
pub trait FailureStore: Send + Sync {
    /// Returns the live entry for `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<FailureCacheEntry>, FailureStoreError>;

    /// Stores `entry` under `key` for `ttl`, replacing any previous entry.
    async fn put(
        &self,
        key: &str,
        entry: FailureCacheEntry,
        ttl: Duration,
    ) -> Result<(), FailureStoreError>;

    async fn delete(&self, key: &str) -> Result<(), FailureStoreError>;
}

struct Slot {
    entry: FailureCacheEntry,
    /// `None` when `now + ttl` is not representable; such slots never expire.
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live_at(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local [`FailureStore`] backed by a concurrent map.
///
/// Expired entries are dropped lazily when read; [`purge_expired`](Self::purge_expired)
/// sweeps the whole map for long-lived processes.
#[derive(Default)]
pub struct InMemoryFailureStore {
    slots: DashMap<String, Slot>,
}

impl InMemoryFailureStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live_at(now));
        before.saturating_sub(self.slots.len())
    }
}

#[async_trait]
impl FailureStore for InMemoryFailureStore {
    async fn get(&self, key: &str) -> Result<Option<FailureCacheEntry>, FailureStoreError> {
        let now = Instant::now();
        let expired = match self.slots.get(key) {
            Some(slot) if slot.is_live_at(now) => return Ok(Some(slot.entry.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.slots.remove_if(key, |_, slot| !slot.is_live_at(now));
        }
        Ok(None)
    }

    async fn put(
        &self,
        key: &str,
        entry: FailureCacheEntry,
        ttl: Duration,
    ) -> Result<(), FailureStoreError> {
        let expires_at = Instant::now().checked_add(ttl);
        self.slots
            .insert(key.to_owned(), Slot { entry, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), FailureStoreError> {
        self.slots.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::category::FailureCategory;
    use time::OffsetDateTime;

    fn entry(message: &str) -> FailureCacheEntry {
        FailureCacheEntry {
            cached_at: OffsetDateTime::now_utc(),
            repository: "products".to_owned(),
            lookup_type: "by_id".to_owned(),
            identifiers: vec!["42".to_owned()],
            error_type: "RemoteServiceError".to_owned(),
            message: message.to_owned(),
            http_status: Some(404),
            category: FailureCategory::NotFound,
            ttl_secs: 60,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let store = InMemoryFailureStore::new();
        store
            .put("k", entry("gone"), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty(), "expired entry is dropped on read");
    }

    #[tokio::test]
    async fn huge_ttl_is_kept_without_expiry() {
        let store = InMemoryFailureStore::new();
        store.put("k", entry("forever"), Duration::MAX).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        assert_eq!(store.purge_expired(), 0);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = InMemoryFailureStore::new();
        let ttl = Duration::from_secs(60);
        store.put("k", entry("first"), ttl).await.unwrap();
        store.put("k", entry("second"), ttl).await.unwrap();

        assert_eq!(store.get("k").await.unwrap().unwrap().message, "second");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = InMemoryFailureStore::new();
        store
            .put("k", entry("gone"), Duration::from_secs(60))
            .await
            .unwrap();
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        store.delete("missing").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let store = InMemoryFailureStore::new();
        store
            .put("short", entry("a"), Duration::from_secs(10))
            .await
            .unwrap();
        store
            .put("long", entry("b"), Duration::from_secs(100))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.purge_expired(), 1);
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_lose_the_key() {
        let store = std::sync::Arc::new(InMemoryFailureStore::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .put("k", entry(&format!("w{i}")), Duration::from_secs(60))
                        .await
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.len(), 1);
        assert!(store.get("k").await.unwrap().is_some());
    }
}
