//! Outbound header construction and the contextual header resolver protocol.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use regex::Regex;
use remote_repo_utils::SecretString;

use crate::context::{CORRELATION_ID_HEADER, REQUEST_ID_HEADER, RequestContext, TRACE_HEADER};
use crate::error::ConfigurationError;

const JSON_API: &str = "application/json";

static TRACE_ROOT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new("Root=([^;]+)").ok());

/// Computes a header value from the inbound request context.
///
/// `None` means the header is left out.
#[async_trait]
pub trait HeaderResolver: Send + Sync {
    async fn resolve(&self, ctx: &RequestContext) -> Option<String>;
}

/// Resolvers addressable by the names used in `contextual_headers` config.
#[derive(Clone, Default)]
pub struct HeaderResolverRegistry {
    resolvers: HashMap<String, Arc<dyn HeaderResolver>>,
}

impl HeaderResolverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `resolver` under `name`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, resolver: Arc<dyn HeaderResolver>) -> Self {
        self.register(name, resolver);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, resolver: Arc<dyn HeaderResolver>) {
        self.resolvers.insert(name.into(), resolver);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn HeaderResolver>> {
        self.resolvers.get(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl std::fmt::Debug for HeaderResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.resolvers.keys().collect();
        names.sort();
        f.debug_struct("HeaderResolverRegistry")
            .field("resolvers", &names)
            .finish()
    }
}

/// Correlation id carried by a trace header value.
///
/// The `Root=` segment when present, otherwise the whole value.
#[must_use]
pub fn correlation_id(trace: &str) -> &str {
    TRACE_ROOT
        .as_ref()
        .and_then(|re| re.captures(trace))
        .and_then(|caps| caps.get(1))
        .map_or(trace, |m| m.as_str())
}

/// Header configuration consulted when building outbound headers.
#[derive(Debug, Clone, Copy)]
pub struct HeaderRules<'a> {
    pub passthrough: &'a [String],
    pub contextual: &'a BTreeMap<String, String>,
}

impl HeaderRules<'_> {
    /// Check that every configured header name is a valid HTTP header name.
    ///
    /// # Errors
    /// [`ConfigurationError::InvalidHeader`] naming the first invalid entry.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.passthrough
            .iter()
            .chain(self.contextual.keys())
            .try_for_each(|name| parse_name(name).map(drop))
    }
}

/// Build the header set sent on every call of a client.
///
/// Order: content negotiation, bearer token, request id, trace header,
/// correlation id, passthrough headers, contextual headers. A contextual header
/// already present on the inbound request is passed through instead of resolved.
/// Content negotiation and authorization can't be overridden by either list.
///
/// # Errors
/// [`ConfigurationError::InvalidHeader`] when a configured header name or the
/// token is not a valid HTTP header.
pub async fn build_outbound_headers(
    token: &SecretString,
    ctx: &RequestContext,
    rules: HeaderRules<'_>,
    registry: &HeaderResolverRegistry,
) -> Result<HeaderMap, ConfigurationError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(JSON_API));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_API));

    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.expose())).map_err(|_| {
        ConfigurationError::InvalidHeader {
            name: AUTHORIZATION.to_string(),
        }
    })?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);

    if let Some(request_id) = ctx.request_id() {
        insert_value(&mut headers, REQUEST_ID_HEADER, request_id);
    }
    if let Some(trace) = ctx.trace_id() {
        insert_value(&mut headers, TRACE_HEADER, trace);
        insert_value(&mut headers, CORRELATION_ID_HEADER, correlation_id(trace));
    }

    for name in rules.passthrough {
        let header = parse_name(name)?;
        if is_reserved(&header) {
            tracing::warn!(header = %header, "reserved header can't be passed through; skipping");
            continue;
        }
        if let Some(value) = ctx.header(header.as_str()) {
            insert_value(&mut headers, header.as_str(), value);
        }
    }

    for (name, resolver_name) in rules.contextual {
        let header = parse_name(name)?;
        if is_reserved(&header) {
            tracing::warn!(header = %header, "reserved header can't be resolved; skipping");
            continue;
        }
        if let Some(value) = ctx.header(header.as_str()) {
            insert_value(&mut headers, header.as_str(), value);
            continue;
        }
        let Some(resolver) = registry.get(resolver_name) else {
            tracing::warn!(
                header = %header,
                resolver = %resolver_name,
                "no resolver registered for contextual header; omitting"
            );
            continue;
        };
        if let Some(value) = resolver.resolve(ctx).await {
            insert_value(&mut headers, header.as_str(), &value);
        }
    }

    Ok(headers)
}

fn parse_name(name: &str) -> Result<HeaderName, ConfigurationError> {
    HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| ConfigurationError::InvalidHeader {
        name: name.to_owned(),
    })
}

fn is_reserved(name: &HeaderName) -> bool {
    [ACCEPT, CONTENT_TYPE, AUTHORIZATION].contains(name)
}

fn insert_value(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!(header = name, "dropping header with invalid value"),
    }
}
