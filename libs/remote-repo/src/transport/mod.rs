//! Wire transport seam between the client and the network.

mod hyper_client;

pub use hyper_client::HttpDocumentTransport;

use async_trait::async_trait;
use http::HeaderMap;
use thiserror::Error;

use crate::document::{DocumentError, DocumentResponse};
use crate::error::BoxError;

/// Failure below the JSON:API layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(std::time::Duration),

    #[error("connection failed: {0}")]
    Connect(#[source] BoxError),

    #[error("transport error: {0}")]
    Io(#[source] BoxError),

    /// The remote answered with a body that is not a JSON:API document.
    #[error(
        "malformed response body{}: {source}",
        .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
    )]
    Malformed {
        status: Option<u16>,
        #[source]
        source: DocumentError,
    },

    #[error(
        "response body exceeds limit of {limit} bytes{}",
        .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
    )]
    BodyTooLarge { status: Option<u16>, limit: usize },

    #[error("invalid request URL '{url}': {reason}")]
    InvalidUri { url: String, reason: String },
}

impl TransportError {
    /// HTTP status of the response the failure happened on, if one arrived.
    #[must_use]
    pub fn response_status(&self) -> Option<u16> {
        match self {
            Self::Malformed { status, .. } | Self::BodyTooLarge { status, .. } => *status,
            _ => None,
        }
    }
}

/// Sends JSON:API requests and parses the responses.
///
/// Implementations return any parsed response, error documents included;
/// status interpretation and retries belong to the client.
#[async_trait]
pub trait DocumentTransport: Send + Sync {
    /// # Errors
    /// [`TransportError`] when no parseable response was received.
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<DocumentResponse, TransportError>;

    /// # Errors
    /// [`TransportError`] when no parseable response was received.
    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &serde_json::Value,
    ) -> Result<DocumentResponse, TransportError>;
}
