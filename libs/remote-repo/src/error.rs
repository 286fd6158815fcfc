use std::error::Error as StdError;
use std::fmt;

use http::StatusCode;
use remote_repo_failure_cache::{CachedLookupFailure, FailureSource};
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Misconfiguration of the client or its collaborators.
///
/// Never retried; surfaces immediately to the caller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    #[error(
        "no base URI configured for remote service '{service}'; checked keys: {}",
        .checked_keys.join(", ")
    )]
    MissingBaseUri {
        service: String,
        checked_keys: Vec<String>,
    },

    #[error("invalid base URI '{uri}' for remote service '{service}' (from '{key}'): {reason}")]
    InvalidBaseUri {
        service: String,
        uri: String,
        key: String,
        reason: String,
    },

    #[error("invalid remote repository config: {0}")]
    InvalidConfig(#[source] Box<figment::Error>),

    /// The client was built without a transport (misconfigured test double or
    /// an uninitialized instance).
    #[error("transport is not initialized for remote service '{service}'")]
    TransportNotInitialized { service: String },

    #[error("failed to obtain access token for remote service '{service}': {source}")]
    Credentials {
        service: String,
        #[source]
        source: BoxError,
    },

    #[error("token provider returned an empty access token for remote service '{service}'")]
    InvalidToken { service: String },

    #[error("invalid outbound header '{name}'")]
    InvalidHeader { name: String },

    /// An absolute URL outside the service's base URI origin; credentials are
    /// only sent to the configured service.
    #[error("URL '{url}' is outside the base URI of remote service '{service}'")]
    ForeignUrl { service: String, url: String },

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[source] BoxError),
}

/// Definitive or retry-exhausted failure of a remote service call.
///
/// Carries the remote HTTP status unchanged whenever the remote produced one.
/// Failures without a usable response get a synthetic 502 or 503 and are
/// flagged as such.
#[derive(Debug)]
pub struct RemoteServiceError {
    service: String,
    endpoint: String,
    status: StatusCode,
    details: Vec<String>,
    synthetic: bool,
    upstream_status: Option<u16>,
    source: Option<BoxError>,
}

impl RemoteServiceError {
    #[must_use]
    pub fn new(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        status: StatusCode,
        details: Vec<String>,
    ) -> Self {
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            status,
            details,
            synthetic: false,
            upstream_status: None,
            source: None,
        }
    }

    /// Error whose status was made up locally because no usable remote
    /// response exists (network failure, timeout).
    #[must_use]
    pub fn synthetic(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        status: StatusCode,
        details: Vec<String>,
    ) -> Self {
        Self {
            synthetic: true,
            ..Self::new(service, endpoint, status, details)
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Record the status the remote actually sent when it differs from
    /// [`status`](Self::status), e.g. a 2xx carrying error objects.
    #[must_use]
    pub fn with_upstream_status(mut self, status: u16) -> Self {
        self.upstream_status = Some(status);
        self
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn details(&self) -> &[String] {
        &self.details
    }

    /// Status sent by the remote when it was replaced by a normalized one.
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        self.upstream_status
    }

    /// `true` when the status was not produced by the remote.
    #[must_use]
    pub fn is_synthetic_status(&self) -> bool {
        self.synthetic
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }
}

impl fmt::Display for RemoteServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} failed with HTTP {}",
            self.service,
            self.endpoint,
            self.status.as_u16()
        )?;
        if !self.details.is_empty() {
            write!(f, ": {}", self.details.join("; "))?;
        }
        Ok(())
    }
}

impl StdError for RemoteServiceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl FailureSource for RemoteServiceError {
    fn http_status(&self) -> Option<u16> {
        (!self.synthetic).then(|| self.status.as_u16())
    }

    fn error_type(&self) -> &str {
        if self.synthetic {
            "TransportError"
        } else {
            "RemoteServiceError"
        }
    }

    fn message(&self) -> String {
        let mut message = self.to_string();
        let mut current = self.source();
        while let Some(cause) = current {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            current = cause.source();
        }
        message
    }
}

/// Error returned by client and repository operations.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Service(#[from] RemoteServiceError),

    /// The same lookup failed recently; no remote call was made.
    #[error(transparent)]
    CachedFailure(#[from] CachedLookupFailure),

    /// Free-form failure raised by a repository's fetch hook.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RemoteError {
    /// HTTP status carried by the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Service(e) => Some(e.status()),
            Self::CachedFailure(e) => e.http_status().and_then(|s| StatusCode::from_u16(s).ok()),
            Self::Configuration(_) | Self::Other(_) => None,
        }
    }

    #[must_use]
    pub fn as_service(&self) -> Option<&RemoteServiceError> {
        match self {
            Self::Service(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_cached_failure(&self) -> bool {
        matches!(self, Self::CachedFailure(_))
    }
}

impl FailureSource for RemoteError {
    fn http_status(&self) -> Option<u16> {
        match self {
            Self::Service(e) => e.http_status(),
            Self::CachedFailure(e) => e.http_status(),
            Self::Configuration(_) | Self::Other(_) => None,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Service(e) => e.error_type(),
            Self::CachedFailure(e) => e.original_error_type(),
            Self::Configuration(_) => "ConfigurationError",
            Self::Other(_) => "Error",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Service(e) => FailureSource::message(e),
            Self::CachedFailure(e) => e.original_message().to_owned(),
            Self::Configuration(e) => e.to_string(),
            Self::Other(e) => format!("{e:#}"),
        }
    }
}
