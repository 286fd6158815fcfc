//! Remote service client core: lazy credentials, retries and status-preserving
//! error classification.

use std::convert::Infallible;
use std::sync::Arc;

use http::{HeaderMap, StatusCode};
use remote_repo_utils::SecretString;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::config::{RemoteClientConfig, RemoteServiceSettings, validate_base_uri};
use crate::context::RequestContext;
use crate::credentials::TokenProvider;
use crate::document::{DocumentResponse, Fetched, PrimaryData, RecoverableError};
use crate::error::{ConfigurationError, RemoteError, RemoteServiceError};
use crate::headers::{HeaderResolverRegistry, HeaderRules, build_outbound_headers};
use crate::query::encode_query;
use crate::status::normalize_status;
use crate::transport::{DocumentTransport, HttpDocumentTransport, TransportError};
use crate::validation::is_safe_get_path;

/// Detail attached when the transport produced no HTTP response at all.
pub const NO_RESPONSE_DETAIL: &str = "No response available";

#[derive(Clone, Copy)]
enum Call<'a> {
    Get,
    Post(&'a Value),
}

impl Call<'_> {
    fn method(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post(_) => "POST",
        }
    }
}

enum Step<T> {
    Done(DocumentResponse),
    Intercepted(T),
}

/// Client for one remote JSON:API service, scoped to one inbound request.
///
/// Credentials and outbound headers are loaded on the first network call and
/// reused for the lifetime of the instance. Operations that don't touch the
/// network never load credentials.
pub struct RemoteClient {
    service: String,
    base_uri: String,
    config: RemoteClientConfig,
    transport: Option<Arc<dyn DocumentTransport>>,
    token_provider: Arc<dyn TokenProvider>,
    resolvers: HeaderResolverRegistry,
    context: RequestContext,
    token: Option<SecretString>,
    headers: Option<HeaderMap>,
    recoverable_error_patterns: Vec<String>,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("service", &self.service)
            .field("base_uri", &self.base_uri)
            .field("has_transport", &self.transport.is_some())
            .field("headers_loaded", &self.headers.is_some())
            .field("recoverable_error_patterns", &self.recoverable_error_patterns)
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    #[must_use]
    pub fn builder(service: impl Into<String>, base_uri: impl Into<String>) -> RemoteClientBuilder {
        RemoteClientBuilder::new(service, base_uri)
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    #[must_use]
    pub fn config(&self) -> &RemoteClientConfig {
        &self.config
    }

    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Outbound headers, once the first network call has loaded them.
    #[must_use]
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    #[must_use]
    pub fn recoverable_error_patterns(&self) -> &[String] {
        &self.recoverable_error_patterns
    }

    /// Replace the substrings that turn a remote error into a
    /// [`Fetched::Recoverable`] result of [`get`](Self::get).
    pub fn set_recoverable_error_patterns(&mut self, patterns: Vec<String>) {
        self.recoverable_error_patterns = patterns;
    }

    /// Whether `path` may be sent as a GET: it must pass
    /// [`is_safe_get_path`] and fit into `max_url_length` together with the
    /// base URI.
    #[must_use]
    pub fn allowed_get_request(&self, path: &str) -> bool {
        let budget = self
            .config
            .max_url_length
            .saturating_sub(self.base_uri.len());
        is_safe_get_path(path) && path.len() < budget
    }

    /// Absolute URL for `path`. Absolute URLs are returned unchanged.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        if is_absolute(path) {
            return path.to_owned();
        }
        format!("{}/{}", self.base_uri, path.trim_start_matches('/'))
    }

    /// [`url_for`](Self::url_for), restricted to the base URI's origin.
    fn scoped_url(&self, path: &str) -> Result<String, ConfigurationError> {
        let url = self.url_for(path);
        if is_absolute(path) && !same_origin(&self.base_uri, &url) {
            return Err(ConfigurationError::ForeignUrl {
                service: self.service.clone(),
                url,
            });
        }
        Ok(url)
    }

    /// GET a document.
    ///
    /// 4xx responses fail immediately; 5xx responses and transport failures are
    /// retried per the retry config. A remote error whose detail matches a
    /// recoverable pattern short-circuits into [`Fetched::Recoverable`].
    ///
    /// # Errors
    /// [`RemoteError::Configuration`] for a missing transport, unusable
    /// credentials or an absolute URL outside the base URI's origin;
    /// [`RemoteError::Service`] carrying the remote status otherwise.
    pub async fn get(&mut self, path: &str) -> Result<Fetched, RemoteError> {
        let url = self.scoped_url(path)?;
        let patterns = self.recoverable_error_patterns.clone();
        let step = self
            .run(&url, Call::Get, |resp| recoverable(&patterns, resp))
            .await?;

        match step {
            Step::Done(resp) => Ok(Fetched::Document(resp)),
            Step::Intercepted(hit) => {
                tracing::info!(
                    service = %self.service,
                    path,
                    status = hit.status.as_u16(),
                    pattern = %hit.matched_pattern,
                    "remote error matched recoverable pattern"
                );
                Ok(Fetched::Recoverable(hit))
            }
        }
    }

    /// GET a caller-supplied URL, returning error documents as-is.
    ///
    /// Absolute URLs on any host are accepted. Only transport failures are
    /// retried and raised; error details in the returned document are logged.
    ///
    /// # Errors
    /// [`RemoteError::Configuration`] as for [`get`](Self::get);
    /// [`RemoteError::Service`] when no usable response was received.
    pub async fn get_user_url(&mut self, path: &str) -> Result<DocumentResponse, RemoteError> {
        let url = self.url_for(path);
        let step = self
            .run(&url, Call::Get, |resp| Some(resp.clone()))
            .await?;
        match step {
            Step::Done(resp) => Ok(resp),
            Step::Intercepted(resp) => {
                tracing::warn!(
                    service = %self.service,
                    path,
                    status = resp.raw_status(),
                    details = %resp.document.error_details().join("; "),
                    "remote returned error document"
                );
                Ok(resp)
            }
        }
    }

    /// POST a JSON body. Retries and classification as for [`get`](Self::get),
    /// without recoverable-pattern matching.
    ///
    /// # Errors
    /// As for [`get`](Self::get).
    pub async fn post(&mut self, path: &str, body: &Value) -> Result<DocumentResponse, RemoteError> {
        let url = self.scoped_url(path)?;
        match self
            .run(&url, Call::Post(body), |_| None::<Infallible>)
            .await?
        {
            Step::Done(resp) => Ok(resp),
            Step::Intercepted(never) => match never {},
        }
    }

    /// Send query parameters as a GET when the resulting URL is allowed,
    /// otherwise as a POST to `path` with the parameters as a flat JSON object
    /// of strings.
    ///
    /// # Errors
    /// [`RemoteError::Other`] when the parameters can't be encoded; otherwise as
    /// for [`get`](Self::get) and [`post`](Self::post).
    pub async fn fetch_by_query<T>(&mut self, path: &str, params: &T) -> Result<Fetched, RemoteError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let query = encode_query(params).map_err(|e| RemoteError::Other(e.into()))?;
        let candidate = if query.is_empty() {
            path.to_owned()
        } else if path.contains('?') {
            format!("{path}&{query}")
        } else {
            format!("{path}?{query}")
        };

        if self.allowed_get_request(&candidate) {
            return self.get(&candidate).await;
        }

        tracing::debug!(
            service = %self.service,
            path,
            length = candidate.len(),
            "query not allowed as GET, sending as POST"
        );
        let body: Map<String, Value> =
            serde_urlencoded::from_str(&query).map_err(|e| RemoteError::Other(e.into()))?;
        self.post(path, &Value::Object(body))
            .await
            .map(Fetched::Document)
    }

    /// Primary data of a successful response.
    ///
    /// # Errors
    /// A [`RemoteServiceError`] when the response has error objects, an error
    /// status, or there was no response; see [`normalize_status`] for the
    /// reported status.
    pub fn handle_response(
        &self,
        response: DocumentResponse,
    ) -> Result<Option<PrimaryData>, RemoteServiceError> {
        if response.is_success() {
            return Ok(response.document.data);
        }
        let err = self.response_error(&self.base_uri, &response);
        self.log_failure(&err);
        Err(err)
    }

    async fn run<T>(
        &mut self,
        url: &str,
        call: Call<'_>,
        intercept: impl Fn(&DocumentResponse) -> Option<T> + Send,
    ) -> Result<Step<T>, RemoteError> {
        let transport = self.transport()?;
        let headers = self.ensure_headers().await?;
        let retries = self.config.retry.retries;

        let mut attempt = 0;
        loop {
            if self.config.log_requests {
                tracing::debug!(
                    service = %self.service,
                    method = call.method(),
                    url = %url,
                    attempt = attempt + 1,
                    "sending remote request"
                );
            }
            let outcome = match call {
                Call::Get => transport.get(url, &headers).await,
                Call::Post(body) => transport.post(url, &headers, body).await,
            };

            let failure = match outcome {
                Ok(resp) if resp.is_success() => {
                    return Ok(Step::Done(resp));
                }
                Ok(resp) => {
                    if let Some(hit) = intercept(&resp) {
                        return Ok(Step::Intercepted(hit));
                    }
                    let err = self.response_error(url, &resp);
                    if !err.is_server_error() {
                        return Err(self.fail(err));
                    }
                    err
                }
                Err(TransportError::Malformed { status, source }) => {
                    let detail = format!("Malformed response from {}", self.service);
                    return Err(self.fail(self.unusable_response(url, status, detail, source)));
                }
                Err(err @ (TransportError::BodyTooLarge { .. } | TransportError::InvalidUri { .. })) => {
                    let status = err.response_status();
                    let detail = err.to_string();
                    return Err(self.fail(self.unusable_response(url, status, detail, err)));
                }
                Err(err) => self.transport_error(url, err),
            };

            if attempt >= retries {
                return Err(self.fail(failure));
            }
            let delay = self.config.retry.backoff.delay(attempt);
            attempt += 1;
            tracing::debug!(
                service = %self.service,
                endpoint = url,
                status = failure.status().as_u16(),
                attempt,
                retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %failure,
                "retrying remote call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn transport(&self) -> Result<Arc<dyn DocumentTransport>, ConfigurationError> {
        self.transport
            .clone()
            .ok_or_else(|| ConfigurationError::TransportNotInitialized {
                service: self.service.clone(),
            })
    }

    async fn ensure_headers(&mut self) -> Result<HeaderMap, ConfigurationError> {
        if let Some(headers) = &self.headers {
            return Ok(headers.clone());
        }

        let token = match &self.token {
            Some(token) => token.clone(),
            None => {
                let token = self.token_provider.token().await.map_err(|e| {
                    ConfigurationError::Credentials {
                        service: self.service.clone(),
                        source: e.into(),
                    }
                })?;
                if token.is_blank() {
                    return Err(ConfigurationError::InvalidToken {
                        service: self.service.clone(),
                    });
                }
                self.token = Some(token.clone());
                token
            }
        };

        let rules = HeaderRules {
            passthrough: &self.config.passthrough_headers,
            contextual: &self.config.contextual_headers,
        };
        let headers = build_outbound_headers(&token, &self.context, rules, &self.resolvers).await?;
        tracing::debug!(service = %self.service, count = headers.len(), "outbound headers prepared");
        self.headers = Some(headers.clone());
        Ok(headers)
    }

    /// Error for a response that is not a success. A remote status replaced by
    /// normalization is kept as the upstream status and logged with the failure.
    fn response_error(&self, endpoint: &str, resp: &DocumentResponse) -> RemoteServiceError {
        let status = normalize_status(resp.raw_status(), resp.has_errors());
        let mut details = resp.document.error_details();

        match resp.raw_status() {
            None => {
                details.insert(0, NO_RESPONSE_DETAIL.to_owned());
                RemoteServiceError::synthetic(&self.service, endpoint, status, details)
            }
            Some(raw) if raw != status.as_u16() => {
                RemoteServiceError::new(&self.service, endpoint, status, details)
                    .with_upstream_status(raw)
            }
            Some(_) => RemoteServiceError::new(&self.service, endpoint, status, details),
        }
    }

    /// Non-retryable failure for a response that arrived but can't be used.
    /// Keeps the response status when there was one, else a synthetic 502.
    fn unusable_response(
        &self,
        endpoint: &str,
        status: Option<u16>,
        detail: String,
        source: impl Into<crate::error::BoxError>,
    ) -> RemoteServiceError {
        let details = vec![detail];
        let reported = normalize_status(status, true);
        let err = if status.is_some() {
            RemoteServiceError::new(&self.service, endpoint, reported, details)
        } else {
            RemoteServiceError::synthetic(&self.service, endpoint, reported, details)
        };
        err.with_source(source)
    }

    /// Synthetic 503 for a failure without a response. The detail keeps the
    /// transport message, so timeouts stay distinguishable from connect errors.
    fn transport_error(&self, endpoint: &str, err: TransportError) -> RemoteServiceError {
        RemoteServiceError::synthetic(
            &self.service,
            endpoint,
            StatusCode::SERVICE_UNAVAILABLE,
            vec![err.to_string()],
        )
        .with_source(err)
    }

    fn fail(&self, err: RemoteServiceError) -> RemoteError {
        self.log_failure(&err);
        err.into()
    }

    fn log_failure(&self, err: &RemoteServiceError) {
        if err.is_client_error() {
            tracing::warn!(
                service = %self.service,
                endpoint = err.endpoint(),
                status = err.status().as_u16(),
                upstream_status = err.upstream_status(),
                details = %err.details().join("; "),
                "remote call rejected"
            );
        } else {
            tracing::error!(
                service = %self.service,
                endpoint = err.endpoint(),
                status = err.status().as_u16(),
                upstream_status = err.upstream_status(),
                synthetic = err.is_synthetic_status(),
                error = %err,
                "remote call failed"
            );
        }
    }
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("https://") || path.starts_with("http://")
}

fn same_origin(base: &str, url: &str) -> bool {
    match (Url::parse(base), Url::parse(url)) {
        (Ok(base), Ok(url)) => base.origin() == url.origin(),
        _ => false,
    }
}

fn recoverable(patterns: &[String], resp: &DocumentResponse) -> Option<RecoverableError> {
    let details = resp.document.error_details();
    let pattern = patterns
        .iter()
        .filter(|p| !p.is_empty())
        .find(|p| details.iter().any(|d| d.contains(p.as_str())))?;

    let reported = normalize_status(resp.raw_status(), true);
    let status = if reported.is_client_error() {
        reported
    } else {
        StatusCode::BAD_REQUEST
    };
    Some(RecoverableError {
        status,
        details,
        matched_pattern: pattern.clone(),
    })
}

/// Builder for [`RemoteClient`].
#[must_use]
pub struct RemoteClientBuilder {
    service: String,
    base_uri: String,
    config: RemoteClientConfig,
    transport: Option<Arc<dyn DocumentTransport>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    resolvers: HeaderResolverRegistry,
    context: RequestContext,
}

impl RemoteClientBuilder {
    pub fn new(service: impl Into<String>, base_uri: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            base_uri: base_uri.into(),
            config: RemoteClientConfig::default(),
            transport: None,
            token_provider: None,
            resolvers: HeaderResolverRegistry::default(),
            context: RequestContext::default(),
        }
    }

    /// Start from settings loaded with [`RemoteServiceSettings::load`].
    pub fn from_settings(settings: RemoteServiceSettings) -> Self {
        Self::new(settings.service, settings.base_uri.uri).config(settings.config)
    }

    pub fn config(mut self, config: RemoteClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn DocumentTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use an [`HttpDocumentTransport`] built from `config.transport`.
    ///
    /// # Errors
    /// See [`HttpDocumentTransport::new`].
    pub fn http_transport(self) -> Result<Self, ConfigurationError> {
        let transport = HttpDocumentTransport::new(self.config.transport.clone())?;
        Ok(self.transport(Arc::new(transport)))
    }

    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn resolvers(mut self, resolvers: HeaderResolverRegistry) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// A client without a transport can be built; its network operations fail
    /// with [`ConfigurationError::TransportNotInitialized`].
    ///
    /// # Errors
    /// [`ConfigurationError::InvalidBaseUri`] for an unusable base URI,
    /// [`ConfigurationError::InvalidHeader`] for an invalid configured header
    /// name and [`ConfigurationError::Credentials`] when no token provider was
    /// set.
    pub fn build(self) -> Result<RemoteClient, ConfigurationError> {
        let base_uri = self.base_uri.trim().trim_end_matches('/').to_owned();
        validate_base_uri(&self.service, "base_uri", &base_uri)?;
        HeaderRules {
            passthrough: &self.config.passthrough_headers,
            contextual: &self.config.contextual_headers,
        }
        .validate()?;
        let token_provider = self
            .token_provider
            .ok_or_else(|| ConfigurationError::Credentials {
                service: self.service.clone(),
                source: "no token provider configured".into(),
            })?;

        Ok(RemoteClient {
            recoverable_error_patterns: self.config.recoverable_error_patterns.clone(),
            service: self.service,
            base_uri,
            config: self.config,
            transport: self.transport,
            token_provider,
            resolvers: self.resolvers,
            context: self.context,
            token: None,
            headers: None,
        })
    }
}
