use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::category::FailureCategory;

/// One remembered failure, as written to the [`FailureStore`](crate::FailureStore).
///
/// Serializes to plain JSON so external key-value backends can keep it as a
/// string value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCacheEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
    pub repository: String,
    pub lookup_type: String,
    pub identifiers: Vec<String>,
    pub error_type: String,
    pub message: String,
    pub http_status: Option<u16>,
    pub category: FailureCategory,
    pub ttl_secs: u64,
}

impl FailureCacheEntry {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// `true` once `cached_at + ttl` lies in the past, measured on the wall clock.
    ///
    /// An expiry beyond the representable date range never expires.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        time::Duration::try_from(self.ttl())
            .ok()
            .and_then(|ttl| self.cached_at.checked_add(ttl))
            .is_some_and(|expires_at| expires_at <= now)
    }

    /// # Errors
    /// Returns a JSON error if the entry cannot be serialized.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// # Errors
    /// Returns a JSON error if `raw` is not a valid entry.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
