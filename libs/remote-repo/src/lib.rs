#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Client core for repositories backed by sibling JSON:API services.
//!
//! A [`RemoteClient`] talks to one remote service on behalf of one inbound
//! request:
//!
//! - credentials are loaded lazily, once, through a [`TokenProvider`]
//! - tracing, passthrough and contextual headers are derived from the
//!   [`RequestContext`]
//! - 5xx responses and transport failures are retried; 4xx responses are not
//! - failures surface as [`RemoteServiceError`] carrying the remote's status
//!
//! [`RemoteRepository`] builds id lookups with a per-instance result cache on
//! top of the client, optionally guarded by a cross-request
//! [`FailureCache`](remote_repo_failure_cache::FailureCache).
//!
//! ```ignore
//! let settings = RemoteServiceSettings::load(&figment, "catalog")?;
//! let client = RemoteClientBuilder::from_settings(settings)
//!     .token_provider(tokens)
//!     .context(RequestContext::from_headers(inbound.headers().clone()))
//!     .http_transport()?
//!     .build()?;
//!
//! let mut products = ProductRepository::new(RepositoryCore::new(client).with_failure_store(store));
//! let found = products.find_by_ids_guarded("by_id", &["1", "2"]).await?;
//! ```

mod client;
mod config;
mod context;
mod credentials;
mod document;
mod error;
mod headers;
mod query;
mod repository;
mod retry;
pub mod status;
mod transport;
pub mod validation;

pub use client::{NO_RESPONSE_DETAIL, RemoteClient, RemoteClientBuilder};
pub use config::{
    CONFIG_SECTION, DEFAULT_MAX_URL_LENGTH, HttpTransportConfig, RemoteClientConfig,
    RemoteServiceSettings, ResolvedBaseUri, default_base_uri_keys, resolve_base_uri,
    validate_base_uri,
};
pub use context::{CORRELATION_ID_HEADER, REQUEST_ID_HEADER, RequestContext, TRACE_HEADER};
pub use credentials::{StaticTokenProvider, TokenProvider};
pub use document::{
    Document, DocumentError, DocumentResponse, ErrorObject, Fetched, PrimaryData,
    RecoverableError, Resource,
};
pub use error::{ConfigurationError, RemoteError, RemoteServiceError};
pub use headers::{
    HeaderResolver, HeaderResolverRegistry, HeaderRules, build_outbound_headers, correlation_id,
};
pub use query::encode_query;
pub use repository::{CacheQuery, RemoteRepository, RepositoryCore};
pub use retry::{Backoff, RetryConfig};
pub use transport::{DocumentTransport, HttpDocumentTransport, TransportError};

pub use remote_repo_failure_cache as failure_cache;
pub use remote_repo_utils::SecretString;
