use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, USER_AGENT};
use http::{Method, Request};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use super::{DocumentTransport, TransportError};
use crate::config::HttpTransportConfig;
use crate::document::{Document, DocumentResponse};
use crate::error::ConfigurationError;

type HttpsClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// [`DocumentTransport`] over a pooled hyper client with rustls.
///
/// Plain `http://` URLs are only accepted with
/// [`HttpTransportConfig::allow_insecure_http`].
#[derive(Clone)]
pub struct HttpDocumentTransport {
    client: HttpsClient,
    config: Arc<HttpTransportConfig>,
    user_agent: HeaderValue,
}

impl std::fmt::Debug for HttpDocumentTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDocumentTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpDocumentTransport {
    /// # Errors
    /// [`ConfigurationError::Transport`] when TLS can't be set up or
    /// [`ConfigurationError::InvalidHeader`] for an unusable user agent.
    pub fn new(config: HttpTransportConfig) -> Result<Self, ConfigurationError> {
        let user_agent =
            HeaderValue::from_str(&config.user_agent).map_err(|_| ConfigurationError::InvalidHeader {
                name: USER_AGENT.to_string(),
            })?;

        let builder = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| ConfigurationError::Transport(Box::new(e)))?;
        let connector = if config.allow_insecure_http {
            builder.https_or_http().enable_all_versions().build()
        } else {
            builder.https_only().enable_all_versions().build()
        };

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .build(connector);

        Ok(Self {
            client,
            config: Arc::new(config),
            user_agent,
        })
    }

    #[must_use]
    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<DocumentResponse, TransportError> {
        let mut request = Request::builder()
            .method(method)
            .uri(url)
            .body(Full::new(body))
            .map_err(|e| TransportError::InvalidUri {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;
        request.headers_mut().extend(headers.clone());
        request
            .headers_mut()
            .insert(USER_AGENT, self.user_agent.clone());

        let timeout = self.config.request_timeout;
        tokio::time::timeout(timeout, self.exchange(request))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> Result<DocumentResponse, TransportError> {
        let response = self.client.request(request).await.map_err(|e| {
            if e.is_connect() {
                TransportError::Connect(Box::new(e))
            } else {
                TransportError::Io(Box::new(e))
            }
        })?;

        let status = response.status();
        let limit = self.config.max_body_size;
        let body = Limited::new(response.into_body(), limit)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    TransportError::BodyTooLarge {
                        status: Some(status.as_u16()),
                        limit,
                    }
                } else {
                    TransportError::Io(e)
                }
            })?
            .to_bytes();

        let document = Document::from_slice(&body).map_err(|source| TransportError::Malformed {
            status: Some(status.as_u16()),
            source,
        })?;
        Ok(DocumentResponse::new(status, document))
    }
}

#[async_trait::async_trait]
impl DocumentTransport for HttpDocumentTransport {
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<DocumentResponse, TransportError> {
        self.send(Method::GET, url, headers, Bytes::new()).await
    }

    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &serde_json::Value,
    ) -> Result<DocumentResponse, TransportError> {
        let payload = serde_json::to_vec(body).map_err(|e| TransportError::Io(Box::new(e)))?;
        self.send(Method::POST, url, headers, Bytes::from(payload)).await
    }
}

// Globally installed provider if any, otherwise aws-lc-rs without installing it.
fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}
