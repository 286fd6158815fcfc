//! End-to-end repository flow over real HTTP against a mock service.
//!
//! Wires up: figment settings → `RemoteClient` with the hyper transport →
//! `RemoteRepository` lookups → mock JSON:API service.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use figment::Figment;
use figment::providers::Serialized;
use httpmock::prelude::*;
use remote_repo::failure_cache::{FailureCategory, FailureStore, InMemoryFailureStore};
use remote_repo::{
    Backoff, HeaderResolver, HeaderResolverRegistry, RemoteClient, RemoteClientBuilder,
    RemoteError, RemoteRepository, RemoteServiceSettings, RepositoryCore, RequestContext,
    StaticTokenProvider,
};
use serde_json::json;

struct ProductRepository {
    core: RepositoryCore,
}

#[async_trait]
impl RemoteRepository for ProductRepository {
    fn core(&self) -> &RepositoryCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut RepositoryCore {
        &mut self.core
    }

    async fn filter(&mut self, missing: &[String]) -> Result<(), RemoteError> {
        let query = [("filter[id]", missing.join(","))];
        let fetched = self
            .core
            .client_mut()
            .fetch_by_query("/v1/products", &query)
            .await?;
        if let Some(resp) = fetched.into_document() {
            self.core.cache(&resp.document);
        }
        Ok(())
    }
}

struct CurrentUser;

#[async_trait]
impl HeaderResolver for CurrentUser {
    async fn resolve(&self, ctx: &RequestContext) -> Option<String> {
        ctx.header("x-session-user").map(|u| format!("user:{u}"))
    }
}

fn settings(server: &MockServer, retries: usize) -> RemoteServiceSettings {
    let figment = Figment::from(Serialized::defaults(json!({
        "remote_repository": {
            "passthrough_headers": ["x-tenant-id"],
            "contextual_headers": {"x-user-id": "current_user", "x-org-id": "current_org"},
            "retry": {"retries": retries, "backoff": {"initial": "1ms"}},
            "transport": {"allow_insecure_http": true, "request_timeout": "2s"},
            "services": {
                "catalog": {"base_uri": server.url("/api")}
            }
        }
    })));
    RemoteServiceSettings::load(&figment, "catalog").unwrap()
}

fn client(settings: RemoteServiceSettings, ctx: RequestContext) -> RemoteClient {
    RemoteClientBuilder::from_settings(settings)
        .token_provider(Arc::new(StaticTokenProvider::new("svc-token")))
        .resolvers(HeaderResolverRegistry::new().with("current_user", Arc::new(CurrentUser)))
        .context(ctx)
        .http_transport()
        .unwrap()
        .build()
        .unwrap()
}

fn inbound() -> RequestContext {
    RequestContext::new()
        .with_header("x-request-id", "req-42")
        .with_header("x-amzn-trace-id", "Root=1-abc-def;Parent=123;Sampled=1")
        .with_header("x-tenant-id", "tenant-7")
        .with_header("x-session-user", "alice")
}

fn products_body(ids: &[&str]) -> serde_json::Value {
    let data: Vec<_> = ids
        .iter()
        .map(|id| json!({"type": "products", "id": id, "attributes": {"name": format!("Product {id}")}}))
        .collect();
    json!({"data": data})
}

#[tokio::test]
async fn lookup_propagates_headers_and_caches_results() {
    let server = MockServer::start();
    let api = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/products")
            .query_param("filter[id]", "1,2")
            .header("authorization", "Bearer svc-token")
            .header("accept", "application/json")
            .header("x-request-id", "req-42")
            .header("x-amzn-trace-id", "Root=1-abc-def;Parent=123;Sampled=1")
            .header("x-correlation-id", "1-abc-def")
            .header("x-tenant-id", "tenant-7")
            .header("x-user-id", "user:alice")
            .header_missing("x-org-id");
        then.status(200)
            .header("content-type", "application/vnd.api+json")
            .json_body(products_body(&["1", "2"]));
    });

    let mut repo = ProductRepository {
        core: RepositoryCore::new(client(settings(&server, 0), inbound())),
    };

    let found = repo.find_by_ids(&["1", "2"]).await.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].attribute("name"), Some(&json!("Product 1")));

    let again = repo.find_by_id("2").await.unwrap().unwrap();
    assert_eq!(again.id, "2");
    api.assert_hits(1);
}

#[tokio::test]
async fn remote_status_survives_the_round_trip() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v1/products");
        then.status(429)
            .json_body(json!({"errors": [{"status": "429", "detail": "Slow down"}]}));
    });

    let mut repo = ProductRepository {
        core: RepositoryCore::new(client(settings(&server, 3), inbound())),
    };
    let err = repo.find_by_ids(&["1"]).await.unwrap_err();
    let service = err.as_service().unwrap();
    assert_eq!(service.status().as_u16(), 429);
    assert_eq!(service.details(), ["Slow down"]);
}

#[tokio::test]
async fn server_errors_are_retried_until_exhausted() {
    let server = MockServer::start();
    let api = server.mock(|when, then| {
        when.method(GET).path("/api/v1/products");
        then.status(503)
            .json_body(json!({"errors": [{"detail": "maintenance"}]}));
    });

    let mut repo = ProductRepository {
        core: RepositoryCore::new(client(settings(&server, 2), inbound())),
    };
    let err = repo.find_by_ids(&["1"]).await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(503));
    api.assert_hits(3);
}

#[tokio::test]
async fn html_error_page_keeps_status() {
    let server = MockServer::start();
    let api = server.mock(|when, then| {
        when.method(GET).path("/api/v1/products");
        then.status(500).body("<html>Internal Server Error</html>");
    });

    let mut repo = ProductRepository {
        core: RepositoryCore::new(client(settings(&server, 3), inbound())),
    };
    let err = repo.find_by_ids(&["1"]).await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(500));
    api.assert_hits(1);
}

#[tokio::test]
async fn error_status_without_error_objects_is_not_success() {
    let server = MockServer::start();
    let unavailable = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/products")
            .query_param("filter[id]", "1");
        then.status(503);
    });
    let missing = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/products")
            .query_param("filter[id]", "2");
        then.status(404).json_body(json!({"data": null}));
    });

    let mut repo = ProductRepository {
        core: RepositoryCore::new(client(settings(&server, 1), inbound())),
    };
    let err = repo.find_by_ids(&["1"]).await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(503));
    unavailable.assert_hits(2);

    let err = repo.find_by_ids(&["2"]).await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(404));
    missing.assert_hits(1);
}

#[tokio::test]
async fn long_queries_fall_back_to_post() {
    let server = MockServer::start();
    let ids: Vec<String> = (1..=600).map(|i| format!("{i:05}")).collect();
    let joined = ids.join(",");
    let api = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/products")
            .json_body(json!({"filter[id]": joined}));
        then.status(200).json_body(products_body(&["00001"]));
    });

    let mut repo = ProductRepository {
        core: RepositoryCore::new(client(settings(&server, 0), inbound())),
    };
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let found = repo.find_by_ids(&refs).await.unwrap();
    assert_eq!(found.len(), 1);
    api.assert_hits(1);
}

#[tokio::test]
async fn not_found_is_cached_across_requests() {
    let server = MockServer::start();
    let api = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/products")
            .query_param("filter[id]", "42");
        then.status(404)
            .json_body(json!({"errors": [{"status": "404", "detail": "Product 42 not found"}]}));
    });

    let store: Arc<dyn FailureStore> = Arc::new(InMemoryFailureStore::new());

    // First inbound request hits the remote and records the failure.
    let mut first = ProductRepository {
        core: RepositoryCore::new(client(settings(&server, 0), inbound()))
            .with_failure_store(store.clone()),
    };
    let err = first.find_by_ids_guarded("by_id", &["42"]).await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(404));

    // Second inbound request fails fast from the cache.
    let mut second = ProductRepository {
        core: RepositoryCore::new(client(settings(&server, 0), inbound()))
            .with_failure_store(store),
    };
    let err = second.find_by_ids_guarded("by_id", &["42"]).await.unwrap_err();
    let RemoteError::CachedFailure(cached) = err else {
        panic!("expected cached failure, got {err}");
    };
    assert_eq!(cached.category(), FailureCategory::NotFound);
    assert_eq!(cached.identifiers(), ["42"]);
    assert!(cached.original_message().contains("Product 42 not found"));
    api.assert_hits(1);

    // After the product is created the entry is cleared and the remote is asked again.
    second.clear_cached_failure("by_id", &["42"]).await;
    second.find_by_ids_guarded("by_id", &["42"]).await.unwrap_err();
    api.assert_hits(2);
}

#[tokio::test]
async fn unreachable_service_is_classified_as_connection_error() {
    let figment = Figment::from(Serialized::defaults(json!({
        "remote_repository": {
            "retry": {"retries": 1, "backoff": {"initial": "1ms"}},
            "transport": {"allow_insecure_http": true}
        },
        "catalog": {"base_uri": "http://127.0.0.1:1/api"}
    })));
    let settings = RemoteServiceSettings::load(&figment, "catalog").unwrap();
    assert_eq!(settings.base_uri.source_key, "catalog.base_uri");

    let mut repo = ProductRepository {
        core: RepositoryCore::new(client(settings, RequestContext::new()))
            .with_failure_store(Arc::new(InMemoryFailureStore::new())),
    };
    let err = repo.find_by_ids_guarded("by_id", &["1"]).await.unwrap_err();
    let service = err.as_service().unwrap();
    assert!(service.is_synthetic_status());
    assert_eq!(service.status().as_u16(), 503);

    let err = repo.find_by_ids_guarded("by_id", &["1"]).await.unwrap_err();
    let RemoteError::CachedFailure(cached) = err else {
        panic!("expected cached failure, got {err}");
    };
    assert_eq!(cached.category(), FailureCategory::ConnectionError);
    assert!(cached.is_transient());
    assert_eq!(cached.http_status(), None);
}

#[test]
fn backoff_settings_are_loaded() {
    let figment = Figment::from(Serialized::defaults(json!({
        "remote_repository": {
            "retry": {"backoff": {"initial": "100ms", "max": "1s", "multiplier": 2.0}},
            "contextual_headers": {"x-user-id": "current_user"},
            "services": {"catalog": {"base_uri": "https://catalog.internal"}}
        }
    })));
    let settings = RemoteServiceSettings::load(&figment, "catalog").unwrap();
    assert_eq!(
        settings.config.retry.backoff,
        Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: false,
        }
    );
    assert_eq!(
        settings.config.contextual_headers,
        BTreeMap::from([("x-user-id".to_owned(), "current_user".to_owned())])
    );
}
