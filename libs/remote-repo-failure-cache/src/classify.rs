use std::error::Error as StdError;

use crate::category::FailureCategory;

/// View of an error that the failure cache can classify and remember.
///
/// Implemented by the remote client's error types; [`FailureSnapshot`] covers
/// everything else.
pub trait FailureSource {
    /// HTTP status returned by the remote, `None` when no response was received.
    fn http_status(&self) -> Option<u16>;

    /// Short type name of the original error, kept for diagnostics.
    fn error_type(&self) -> &str;

    /// Human readable message of the original error.
    fn message(&self) -> String;
}

/// Owned copy of an arbitrary error's classification inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSnapshot {
    pub http_status: Option<u16>,
    pub error_type: String,
    pub message: String,
}

impl FailureSnapshot {
    #[must_use]
    pub fn new(
        http_status: Option<u16>,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            http_status,
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Captures an error together with its whole `source()` chain as the message.
    #[must_use]
    pub fn from_error(err: &(dyn StdError + 'static), http_status: Option<u16>) -> Self {
        let mut message = err.to_string();
        let mut current = err.source();
        while let Some(cause) = current {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            current = cause.source();
        }
        Self {
            http_status,
            error_type: short_type_name(err),
            message,
        }
    }
}

impl FailureSource for FailureSnapshot {
    fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    fn error_type(&self) -> &str {
        &self.error_type
    }

    fn message(&self) -> String {
        self.message.clone()
    }
}

fn short_type_name(err: &(dyn StdError + 'static)) -> String {
    if err.is::<std::io::Error>() {
        return "io::Error".to_owned();
    }
    "Error".to_owned()
}

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "deadline exceeded"];

const CONNECTION_MARKERS: &[&str] = &[
    "connection",
    "connect error",
    "refused",
    "unreachable",
    "dns",
    "resolve",
    "broken pipe",
];

/// Maps a failure onto its [`FailureCategory`].
///
/// The HTTP status decides whenever there is one. Without a status, the error
/// type and message are searched for timeout and connection markers.
#[must_use]
pub fn classify(failure: &(dyn FailureSource + '_)) -> FailureCategory {
    match failure.http_status() {
        Some(404) => FailureCategory::NotFound,
        Some(401 | 403) => FailureCategory::AuthError,
        Some(429) => FailureCategory::RateLimited,
        Some(500..=599) => FailureCategory::ServerError,
        Some(400..=499) => FailureCategory::ClientError,
        Some(_) => FailureCategory::Unknown,
        None => {
            let haystack = format!("{} {}", failure.error_type(), failure.message()).to_lowercase();
            if TIMEOUT_MARKERS.iter().any(|m| haystack.contains(m)) {
                FailureCategory::Timeout
            } else if CONNECTION_MARKERS.iter().any(|m| haystack.contains(m)) {
                FailureCategory::ConnectionError
            } else {
                FailureCategory::Unknown
            }
        }
    }
}
