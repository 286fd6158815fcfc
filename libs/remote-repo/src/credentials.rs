//! Access token sourcing for outbound calls.

use async_trait::async_trait;
use remote_repo_utils::SecretString;

/// Supplies the bearer token used on every call of a client.
///
/// Called at most once per client instance, on the first network operation.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// # Errors
    /// Any failure to obtain a token; the client reports it as a configuration
    /// error and does not retry.
    async fn token(&self) -> anyhow::Result<SecretString>;
}

/// Provider returning a fixed token, e.g. a service account key from config.
#[derive(Clone, Debug)]
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    #[must_use]
    pub fn new(token: impl Into<SecretString>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> anyhow::Result<SecretString> {
        Ok(self.token.clone())
    }
}
