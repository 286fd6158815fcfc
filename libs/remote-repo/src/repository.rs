//! Repositories backed by a remote service, with a per-instance result cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use remote_repo_failure_cache::{FailureCache, FailureStore};
use serde_json::Value;

use crate::client::RemoteClient;
use crate::document::{Document, PrimaryData, Resource};
use crate::error::{RemoteError, RemoteServiceError};

/// State shared by every [`RemoteRepository`]: the client and the resources
/// fetched so far.
///
/// The result cache lives as long as the repository instance and only grows
/// until [`reset`](Self::reset) is called.
#[derive(Debug)]
pub struct RepositoryCore {
    client: RemoteClient,
    items: HashMap<String, Resource>,
    failure_cache: Option<FailureCache>,
}

impl RepositoryCore {
    #[must_use]
    pub fn new(client: RemoteClient) -> Self {
        Self {
            client,
            items: HashMap::new(),
            failure_cache: None,
        }
    }

    /// Attach a failure cache over `store`, named after the client's service and
    /// configured from its `failure_cache` settings.
    #[must_use]
    pub fn with_failure_store(self, store: Arc<dyn FailureStore>) -> Self {
        let cache = FailureCache::new(
            self.client.service(),
            self.client.config().failure_cache.clone(),
            store,
        );
        self.with_failure_cache(cache)
    }

    #[must_use]
    pub fn with_failure_cache(mut self, cache: FailureCache) -> Self {
        self.failure_cache = Some(cache);
        self
    }

    #[must_use]
    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut RemoteClient {
        &mut self.client
    }

    #[must_use]
    pub fn failure_cache(&self) -> Option<&FailureCache> {
        self.failure_cache.as_ref()
    }

    /// Add every primary resource of `document`. Returns how many were added
    /// or replaced.
    pub fn cache(&mut self, document: &Document) -> usize {
        let Some(data) = &document.data else {
            return 0;
        };
        let resources = data.resources();
        for resource in resources {
            self.items.insert(resource.id.clone(), resource.clone());
        }
        resources.len()
    }

    /// Add the single primary resource of `document`. Collections are ignored.
    pub fn cache_one(&mut self, document: &Document) -> bool {
        match &document.data {
            Some(PrimaryData::One(resource)) => {
                self.items.insert(resource.id.clone(), (**resource).clone());
                true
            }
            Some(PrimaryData::Many(_)) | None => false,
        }
    }

    #[must_use]
    pub fn has_id(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.items.get(id)
    }

    /// Query over the cached resources.
    #[must_use]
    pub fn query(&self) -> CacheQuery<'_> {
        CacheQuery {
            items: &self.items,
            kind: None,
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every cached resource.
    pub fn reset(&mut self) {
        self.items.clear();
    }
}

/// Filter over the resources in a [`RepositoryCore`].
///
/// Results are ordered by id.
#[must_use]
pub struct CacheQuery<'a> {
    items: &'a HashMap<String, Resource>,
    kind: Option<String>,
    attributes: Vec<(String, Value)>,
}

impl<'a> CacheQuery<'a> {
    pub fn of_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn where_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    fn matches(&self, resource: &Resource) -> bool {
        self.kind.as_deref().is_none_or(|k| resource.kind == k)
            && self
                .attributes
                .iter()
                .all(|(name, value)| resource.attribute(name) == Some(value))
    }

    #[must_use]
    pub fn all(self) -> Vec<&'a Resource> {
        let mut found: Vec<&'a Resource> = self
            .items
            .values()
            .filter(|r| self.matches(r))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    #[must_use]
    pub fn first(self) -> Option<&'a Resource> {
        self.all().into_iter().next()
    }

    #[must_use]
    pub fn ids(self) -> Vec<&'a str> {
        self.all().into_iter().map(|r| r.id.as_str()).collect()
    }

    #[must_use]
    pub fn count(self) -> usize {
        self.items.values().filter(|r| self.matches(r)).count()
    }
}

/// Non-blank ids in request order, without duplicates.
fn normalize_ids(ids: &[&str]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(str::to_owned)
        .collect()
}

/// A repository whose resources come from a remote service.
///
/// Implementors provide [`filter`](Self::filter), which fetches the given ids
/// and adds them to the core's cache; lookups are provided on top of it.
///
/// ```ignore
/// #[async_trait]
/// impl RemoteRepository for ProductRepository {
///     fn core(&self) -> &RepositoryCore { &self.core }
///     fn core_mut(&mut self) -> &mut RepositoryCore { &mut self.core }
///
///     async fn filter(&mut self, missing: &[String]) -> Result<(), RemoteError> {
///         let query = [("filter[id]", missing.join(","))];
///         let fetched = self.core.client_mut().fetch_by_query("/v1/products", &query).await?;
///         if let Some(resp) = fetched.into_document() {
///             self.core.cache(&resp.document);
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    fn core(&self) -> &RepositoryCore;

    fn core_mut(&mut self) -> &mut RepositoryCore;

    /// Name used in logs.
    fn name(&self) -> &str {
        self.core().client().service()
    }

    /// Fetch `missing` from the remote and add them to the cache.
    ///
    /// Only called with ids that are not cached yet.
    ///
    /// # Errors
    /// Any failure of the remote call.
    async fn filter(&mut self, missing: &[String]) -> Result<(), RemoteError>;

    /// Resources for `ids`, in request order, fetching only uncached ids.
    ///
    /// Blank ids are ignored and ids the remote does not know are simply
    /// absent from the result.
    ///
    /// # Errors
    /// Errors of [`filter`](Self::filter). Free-form
    /// [`RemoteError::Other`] failures are wrapped into a 502
    /// [`RemoteServiceError`].
    async fn find_by_ids(&mut self, ids: &[&str]) -> Result<Vec<Resource>, RemoteError> {
        let requested = normalize_ids(ids);
        let missing: Vec<String> = requested
            .iter()
            .filter(|id| !self.core().has_id(id))
            .cloned()
            .collect();

        if !missing.is_empty() {
            tracing::debug!(
                repository = self.name(),
                requested = requested.len(),
                missing = missing.len(),
                "fetching uncached ids"
            );
            if let Err(err) = self.filter(&missing).await {
                return Err(wrap_lookup_error(self.name(), self.core().client(), &missing, err));
            }
        }

        Ok(requested
            .iter()
            .filter_map(|id| self.core().get(id).cloned())
            .collect())
    }

    /// # Errors
    /// As for [`find_by_ids`](Self::find_by_ids).
    async fn find_by_id(&mut self, id: &str) -> Result<Option<Resource>, RemoteError> {
        Ok(self.find_by_ids(&[id]).await?.into_iter().next())
    }

    /// Cached resource for `id`; never calls the remote.
    fn find_by_id_without_retrieve(&self, id: &str) -> Option<Resource> {
        self.core().get(id.trim()).cloned()
    }

    /// [`find_by_ids`](Self::find_by_ids) guarded by the failure cache.
    ///
    /// A lookup that failed recently fails again with
    /// [`RemoteError::CachedFailure`] without calling the remote. Remote
    /// failures are recorded. Without a failure cache, or when every id is
    /// already cached, this is plain `find_by_ids`.
    ///
    /// # Errors
    /// As for [`find_by_ids`](Self::find_by_ids), plus cached failures.
    async fn find_by_ids_guarded(
        &mut self,
        lookup_type: &str,
        ids: &[&str],
    ) -> Result<Vec<Resource>, RemoteError> {
        let requested = normalize_ids(ids);
        let Some(cache) = self.core().failure_cache().cloned() else {
            return self.find_by_ids(ids).await;
        };
        if requested.iter().all(|id| self.core().has_id(id)) {
            return self.find_by_ids(ids).await;
        }

        cache.check(lookup_type, &requested).await?;
        match self.find_by_ids(ids).await {
            Err(RemoteError::Service(err)) => {
                cache.record(lookup_type, &err, &requested).await;
                Err(err.into())
            }
            result => result,
        }
    }

    /// Forget a recorded failure, e.g. after creating the missing resource.
    async fn clear_cached_failure(&self, lookup_type: &str, ids: &[&str]) {
        if let Some(cache) = self.core().failure_cache() {
            cache.clear(lookup_type, &normalize_ids(ids)).await;
        }
    }
}

fn wrap_lookup_error(
    repository: &str,
    client: &RemoteClient,
    missing: &[String],
    err: RemoteError,
) -> RemoteError {
    let RemoteError::Other(cause) = err else {
        return err;
    };
    let detail = format!("{cause:#}");
    tracing::error!(
        repository,
        service = client.service(),
        ids = %missing.join(","),
        error = %detail,
        "remote lookup failed"
    );
    RemoteServiceError::synthetic(
        client.service(),
        client.base_uri(),
        StatusCode::BAD_GATEWAY,
        vec![detail],
    )
    .with_source(cause)
    .into()
}
