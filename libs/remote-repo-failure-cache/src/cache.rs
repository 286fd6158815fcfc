use std::sync::Arc;

use time::OffsetDateTime;

use crate::category::FailureCategory;
use crate::classify::{FailureSource, classify};
use crate::config::FailureCacheConfig;
use crate::entry::FailureCacheEntry;
use crate::error::CachedLookupFailure;
use crate::key::cache_key;
use crate::store::{FailureStore, InMemoryFailureStore};

/// Failure cache scoped to one repository.
///
/// The cache is fail-open: store errors are logged and treated as a miss, so a
/// broken cache backend never turns into failed lookups.
///
/// Cloning is cheap; clones share the same store.
#[derive(Clone)]
pub struct FailureCache {
    repository: Arc<str>,
    config: Arc<FailureCacheConfig>,
    store: Arc<dyn FailureStore>,
}

impl FailureCache {
    #[must_use]
    pub fn new(
        repository: impl Into<Arc<str>>,
        config: FailureCacheConfig,
        store: Arc<dyn FailureStore>,
    ) -> Self {
        Self {
            repository: repository.into(),
            config: Arc::new(config),
            store,
        }
    }

    /// Cache backed by a fresh [`InMemoryFailureStore`].
    #[must_use]
    pub fn in_memory(repository: impl Into<Arc<str>>, config: FailureCacheConfig) -> Self {
        Self::new(repository, config, Arc::new(InMemoryFailureStore::new()))
    }

    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    #[must_use]
    pub fn config(&self) -> &FailureCacheConfig {
        &self.config
    }

    #[must_use]
    pub fn key<S: AsRef<str>>(&self, lookup_type: &str, identifiers: &[S]) -> String {
        cache_key(&self.repository, lookup_type, identifiers)
    }

    /// Fails with [`CachedLookupFailure`] when the same lookup failed within its TTL.
    ///
    /// # Errors
    /// Returns the cached failure for a live entry; absent or expired entries pass.
    pub async fn check<S: AsRef<str> + Sync>(
        &self,
        lookup_type: &str,
        identifiers: &[S],
    ) -> Result<(), CachedLookupFailure> {
        if !self.config.enabled {
            return Ok(());
        }
        let key = self.key(lookup_type, identifiers);
        let entry = match self.store.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!(
                    repository = %self.repository,
                    lookup_type,
                    key = %key,
                    error = %e,
                    "failure cache read failed; treating as miss"
                );
                return Ok(());
            }
        };

        if entry.is_expired_at(OffsetDateTime::now_utc()) {
            return Ok(());
        }

        tracing::debug!(
            repository = %self.repository,
            lookup_type,
            key = %key,
            category = %entry.category,
            "failure cache hit"
        );
        Err(CachedLookupFailure::new(entry))
    }

    /// Classifies `failure` and remembers it for the category's TTL, replacing
    /// any previous entry for the same lookup. Returns the category used.
    pub async fn record<S: AsRef<str> + Sync>(
        &self,
        lookup_type: &str,
        failure: &(dyn FailureSource + Sync),
        identifiers: &[S],
    ) -> FailureCategory {
        let category = classify(failure);
        if !self.config.enabled {
            return category;
        }
        let ttl = self.config.ttl_for(category);
        let key = self.key(lookup_type, identifiers);
        let entry = FailureCacheEntry {
            cached_at: OffsetDateTime::now_utc(),
            repository: self.repository.to_string(),
            lookup_type: lookup_type.to_owned(),
            identifiers: identifiers.iter().map(|s| s.as_ref().to_owned()).collect(),
            error_type: failure.error_type().to_owned(),
            message: failure.message(),
            http_status: failure.http_status(),
            category,
            ttl_secs: ttl.as_secs(),
        };

        if let Err(e) = self.store.put(&key, entry, ttl).await {
            tracing::warn!(
                repository = %self.repository,
                lookup_type,
                key = %key,
                error = %e,
                "failed to record lookup failure"
            );
        } else {
            tracing::debug!(
                repository = %self.repository,
                lookup_type,
                key = %key,
                category = %category,
                ttl_secs = ttl.as_secs(),
                "recorded lookup failure"
            );
        }
        category
    }

    /// Forgets a recorded failure, e.g. after creating the resource that was
    /// previously not found.
    pub async fn clear<S: AsRef<str> + Sync>(&self, lookup_type: &str, identifiers: &[S]) {
        if !self.config.enabled {
            return;
        }
        let key = self.key(lookup_type, identifiers);
        if let Err(e) = self.store.delete(&key).await {
            tracing::warn!(
                repository = %self.repository,
                lookup_type,
                key = %key,
                error = %e,
                "failed to clear cached lookup failure"
            );
        }
    }
}

impl std::fmt::Debug for FailureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureCache")
            .field("repository", &self.repository)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::classify::FailureSnapshot;
    use crate::error::FailureStoreError;
    use async_trait::async_trait;
    use std::time::Duration;

    fn not_found() -> FailureSnapshot {
        FailureSnapshot::new(Some(404), "RemoteServiceError", "Not found")
    }

    #[tokio::test]
    async fn record_then_check_fails_with_cached_failure() {
        let cache = FailureCache::in_memory("products", FailureCacheConfig::recommended());
        cache.check("by_id", &["42"]).await.unwrap();

        let category = cache.record("by_id", &not_found(), &["42"]).await;
        assert_eq!(category, FailureCategory::NotFound);

        let err = cache.check("by_id", &["42"]).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert_eq!(err.http_status(), Some(404));
        assert_eq!(err.original_error_type(), "RemoteServiceError");
        assert_eq!(err.original_message(), "Not found");
        assert_eq!(err.identifiers(), ["42".to_owned()]);
        assert_eq!(err.entry().ttl_secs, 600);
    }

    #[tokio::test]
    async fn clear_removes_entry() {
        let cache = FailureCache::in_memory("products", FailureCacheConfig::default());
        cache.record("by_id", &not_found(), &["42"]).await;
        cache.clear("by_id", &["42"]).await;
        cache.check("by_id", &["42"]).await.unwrap();
    }

    #[tokio::test]
    async fn lookups_are_isolated_by_type_and_ids() {
        let cache = FailureCache::in_memory("products", FailureCacheConfig::default());
        cache.record("by_id", &not_found(), &["42"]).await;

        cache.check("by_sku", &["42"]).await.unwrap();
        cache.check("by_id", &["43"]).await.unwrap();
        assert!(cache.check("by_id", &["42", "42"]).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_with_category_ttl() {
        let cache = FailureCache::in_memory("products", FailureCacheConfig::recommended());
        let timeout = FailureSnapshot::new(None, "TransportError", "request timed out");
        assert_eq!(
            cache.record("by_id", &timeout, &["1"]).await,
            FailureCategory::Timeout
        );

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.check("by_id", &["1"]).await.unwrap_err().is_transient());

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.check("by_id", &["1"]).await.unwrap();
    }

    #[tokio::test]
    async fn ttl_beyond_calendar_range_keeps_entry() {
        let config = FailureCacheConfig {
            default_ttl: Duration::from_secs(10_000 * 365 * 24 * 3600),
            ..FailureCacheConfig::default()
        };
        let cache = FailureCache::in_memory("products", config);
        cache.record("by_id", &not_found(), &["1"]).await;

        let err = cache.check("by_id", &["1"]).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn disabled_cache_never_hits() {
        let cache = FailureCache::in_memory("products", FailureCacheConfig::disabled());
        assert_eq!(
            cache.record("by_id", &not_found(), &["42"]).await,
            FailureCategory::NotFound
        );
        cache.check("by_id", &["42"]).await.unwrap();
    }

    struct BrokenStore;

    #[async_trait]
    impl FailureStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<FailureCacheEntry>, FailureStoreError> {
            Err(FailureStoreError::Backend("redis down".into()))
        }

        async fn put(
            &self,
            _key: &str,
            _entry: FailureCacheEntry,
            _ttl: Duration,
        ) -> Result<(), FailureStoreError> {
            Err(FailureStoreError::Backend("redis down".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), FailureStoreError> {
            Err(FailureStoreError::Backend("redis down".into()))
        }
    }

    #[tokio::test]
    async fn store_errors_fail_open() {
        let cache = FailureCache::new(
            "products",
            FailureCacheConfig::default(),
            Arc::new(BrokenStore),
        );
        cache.record("by_id", &not_found(), &["42"]).await;
        cache.check("by_id", &["42"]).await.unwrap();
        cache.clear("by_id", &["42"]).await;
    }

    #[tokio::test]
    async fn clones_share_the_store() {
        let cache = FailureCache::in_memory("products", FailureCacheConfig::default());
        let other = cache.clone();
        cache.record("by_id", &not_found(), &["7"]).await;
        assert!(other.check("by_id", &["7"]).await.is_err());
    }
}
