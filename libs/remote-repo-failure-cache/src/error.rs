use std::fmt;

use thiserror::Error;
use time::OffsetDateTime;

use crate::category::FailureCategory;
use crate::entry::FailureCacheEntry;

/// A lookup was skipped because the same lookup failed within its TTL.
///
/// This is not a live remote response. Callers usually log or suppress it
/// instead of treating it like the original failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedLookupFailure {
    entry: FailureCacheEntry,
}

impl CachedLookupFailure {
    #[must_use]
    pub fn new(entry: FailureCacheEntry) -> Self {
        Self { entry }
    }

    #[must_use]
    pub fn entry(&self) -> &FailureCacheEntry {
        &self.entry
    }

    #[must_use]
    pub fn repository(&self) -> &str {
        &self.entry.repository
    }

    #[must_use]
    pub fn lookup_type(&self) -> &str {
        &self.entry.lookup_type
    }

    #[must_use]
    pub fn identifiers(&self) -> &[String] {
        &self.entry.identifiers
    }

    /// Type name of the error that was originally recorded.
    #[must_use]
    pub fn original_error_type(&self) -> &str {
        &self.entry.error_type
    }

    #[must_use]
    pub fn original_message(&self) -> &str {
        &self.entry.message
    }

    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        self.entry.http_status
    }

    #[must_use]
    pub fn category(&self) -> FailureCategory {
        self.entry.category
    }

    #[must_use]
    pub fn cached_at(&self) -> OffsetDateTime {
        self.entry.cached_at
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.entry.category == FailureCategory::NotFound
    }

    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        self.entry.category == FailureCategory::AuthError
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.entry.category == FailureCategory::RateLimited
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.entry.category.is_transient()
    }
}

impl fmt::Display for CachedLookupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} lookup failed recently ({}",
            self.entry.repository, self.entry.lookup_type, self.entry.category
        )?;
        if let Some(status) = self.entry.http_status {
            write!(f, ", HTTP {status}")?;
        }
        write!(f, "): {}", self.entry.message)
    }
}

impl std::error::Error for CachedLookupFailure {}

/// Failure store backend errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FailureStoreError {
    #[error("failure store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failure store entry is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}
