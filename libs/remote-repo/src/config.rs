//! Client configuration and base-URI resolution.
//!
//! Everything lives under the `remote_repository` section of the host's figment
//! configuration. A service may override any setting in
//! `remote_repository.services.<service>`:
//!
//! ```yaml
//! remote_repository:
//!   max_url_length: 2048
//!   retry:
//!     retries: 1
//!     backoff: { initial: 200ms }
//!   passthrough_headers: [x-tenant-id]
//!   contextual_headers: { x-user-id: current_user }
//!   services:
//!     catalog:
//!       base_uri: https://catalog.internal/api
//!       retry: { retries: 3 }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use figment::Figment;
use remote_repo_failure_cache::FailureCacheConfig;
use remote_repo_utils::humantime_serde;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigurationError;
use crate::retry::RetryConfig;

pub const CONFIG_SECTION: &str = "remote_repository";
pub const DEFAULT_MAX_URL_LENGTH: usize = 2048;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Settings shared by every call of a [`RemoteClient`](crate::RemoteClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteClientConfig {
    /// Upper bound for GET URLs; longer queries go out as POST.
    pub max_url_length: usize,
    /// Log every outbound request at debug level.
    pub log_requests: bool,
    pub retry: RetryConfig,
    /// Substrings of remote error details that callers handle as control flow.
    pub recoverable_error_patterns: Vec<String>,
    /// Inbound headers copied verbatim to outbound calls when present.
    pub passthrough_headers: Vec<String>,
    /// Outbound header name to registered resolver name.
    pub contextual_headers: BTreeMap<String, String>,
    pub failure_cache: FailureCacheConfig,
    pub transport: HttpTransportConfig,
}

impl Default for RemoteClientConfig {
    fn default() -> Self {
        Self {
            max_url_length: DEFAULT_MAX_URL_LENGTH,
            log_requests: false,
            retry: RetryConfig::default(),
            recoverable_error_patterns: Vec::new(),
            passthrough_headers: Vec::new(),
            contextual_headers: BTreeMap::new(),
            failure_cache: FailureCacheConfig::default(),
            transport: HttpTransportConfig::default(),
        }
    }
}

impl RemoteClientConfig {
    /// Settings for `service`: the shared section overlaid with the
    /// service's own overrides. A missing section yields the defaults.
    ///
    /// # Errors
    /// [`ConfigurationError::InvalidConfig`] if either section fails to
    /// deserialize.
    pub fn from_figment(figment: &Figment, service: &str) -> Result<Self, ConfigurationError> {
        let overrides = service_section(service);
        let merged = Figment::new()
            .merge(figment.focus(CONFIG_SECTION))
            .merge(figment.focus(&overrides));
        merged
            .extract::<Self>()
            .map_err(|e| ConfigurationError::InvalidConfig(Box::new(e)))
    }
}

/// Settings of the built-in hyper transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpTransportConfig {
    /// Deadline for one attempt, response body included.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub max_body_size: usize,
    pub user_agent: String,
    /// Accept `http://` base URIs. Meant for local development and tests.
    pub allow_insecure_http: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            user_agent: format!("remote-repo/{}", env!("CARGO_PKG_VERSION")),
            allow_insecure_http: false,
        }
    }
}

/// A base URI and the config key it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBaseUri {
    pub uri: String,
    pub source_key: String,
}

fn service_section(service: &str) -> String {
    format!("{CONFIG_SECTION}.services.{service}")
}

/// Keys checked for the base URI of `service`, canonical key first.
#[must_use]
pub fn default_base_uri_keys(service: &str) -> Vec<String> {
    vec![
        format!("{}.base_uri", service_section(service)),
        format!("services.{service}.base_uri"),
        format!("{service}.base_uri"),
    ]
}

/// First non-empty string found under `keys`, in order.
///
/// Falling back to a non-canonical key logs a deprecation warning naming both
/// keys.
///
/// # Errors
/// [`ConfigurationError::MissingBaseUri`] when no key is set, listing every
/// key checked. [`ConfigurationError::InvalidBaseUri`] when the value is not an
/// absolute `http(s)` URL.
pub fn resolve_base_uri(
    figment: &Figment,
    service: &str,
    keys: &[String],
) -> Result<ResolvedBaseUri, ConfigurationError> {
    for (position, key) in keys.iter().enumerate() {
        let Ok(value) = figment.find_value(key) else {
            continue;
        };
        let Some(uri) = value.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };

        validate_base_uri(service, key, uri)?;
        if position > 0
            && let Some(canonical) = keys.first()
        {
            tracing::warn!(
                service,
                key = %key,
                canonical = %canonical,
                "base URI resolved from deprecated config key; move it to the canonical key"
            );
        }
        return Ok(ResolvedBaseUri {
            uri: uri.trim_end_matches('/').to_owned(),
            source_key: key.clone(),
        });
    }

    Err(ConfigurationError::MissingBaseUri {
        service: service.to_owned(),
        checked_keys: keys.to_vec(),
    })
}

/// Check that `uri` is an absolute `http(s)` URL with a host.
///
/// # Errors
/// [`ConfigurationError::InvalidBaseUri`] naming `key` as the origin.
pub fn validate_base_uri(service: &str, key: &str, uri: &str) -> Result<(), ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidBaseUri {
        service: service.to_owned(),
        uri: uri.to_owned(),
        key: key.to_owned(),
        reason,
    };
    let parsed = Url::parse(uri).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(()),
        "http" | "https" => Err(invalid("missing host".to_owned())),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}

/// Everything needed to build a client for one service.
#[derive(Debug, Clone)]
pub struct RemoteServiceSettings {
    pub service: String,
    pub base_uri: ResolvedBaseUri,
    pub config: RemoteClientConfig,
}

impl RemoteServiceSettings {
    /// Load settings for `service` using [`default_base_uri_keys`].
    ///
    /// # Errors
    /// See [`resolve_base_uri`] and [`RemoteClientConfig::from_figment`].
    pub fn load(figment: &Figment, service: &str) -> Result<Self, ConfigurationError> {
        Self::load_with_keys(figment, service, &default_base_uri_keys(service))
    }

    /// Load settings for `service`, looking up the base URI under `keys`.
    ///
    /// # Errors
    /// See [`resolve_base_uri`] and [`RemoteClientConfig::from_figment`].
    pub fn load_with_keys(
        figment: &Figment,
        service: &str,
        keys: &[String],
    ) -> Result<Self, ConfigurationError> {
        let base_uri = resolve_base_uri(figment, service, keys)?;
        let config = RemoteClientConfig::from_figment(figment, service)?;
        tracing::debug!(service, base_uri = %base_uri.uri, source_key = %base_uri.source_key, "loaded remote service settings");
        Ok(Self {
            service: service.to_owned(),
            base_uri,
            config,
        })
    }
}
