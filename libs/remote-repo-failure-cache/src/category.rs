use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Closed set of reasons a remote lookup can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    NotFound,
    AuthError,
    RateLimited,
    ServerError,
    Timeout,
    ConnectionError,
    ClientError,
    Unknown,
}

impl FailureCategory {
    pub const ALL: [Self; 8] = [
        Self::NotFound,
        Self::AuthError,
        Self::RateLimited,
        Self::ServerError,
        Self::Timeout,
        Self::ConnectionError,
        Self::ClientError,
        Self::Unknown,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AuthError => "auth_error",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection_error",
            Self::ClientError => "client_error",
            Self::Unknown => "unknown",
        }
    }

    /// Transient failures are expected to clear up without any change on the
    /// caller's side.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionError | Self::ServerError | Self::RateLimited
        )
    }

    /// Suggested TTL for the category, `None` for [`FailureCategory::Unknown`]
    /// which always falls back to the configured default.
    #[must_use]
    pub const fn recommended_ttl(self) -> Option<Duration> {
        let secs = match self {
            Self::NotFound => 600,
            Self::AuthError | Self::ClientError => 300,
            Self::RateLimited => 60,
            Self::ServerError => 120,
            Self::Timeout | Self::ConnectionError => 30,
            Self::Unknown => return None,
        };
        Some(Duration::from_secs(secs))
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown category name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown failure category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for FailureCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_owned()))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn transient_subset() {
        let transient: Vec<_> = FailureCategory::ALL
            .into_iter()
            .filter(|c| c.is_transient())
            .collect();
        assert_eq!(
            transient,
            vec![
                FailureCategory::RateLimited,
                FailureCategory::ServerError,
                FailureCategory::Timeout,
                FailureCategory::ConnectionError,
            ]
        );
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for category in FailureCategory::ALL {
            assert_eq!(category.as_str().parse::<FailureCategory>(), Ok(category));
        }
        assert!("gone".parse::<FailureCategory>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&FailureCategory::ConnectionError).unwrap();
        assert_eq!(json, "\"connection_error\"");
    }

    #[test]
    fn recommended_ttls() {
        assert_eq!(
            FailureCategory::NotFound.recommended_ttl(),
            Some(Duration::from_secs(600))
        );
        assert_eq!(
            FailureCategory::Timeout.recommended_ttl(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(FailureCategory::Unknown.recommended_ttl(), None);
    }
}
