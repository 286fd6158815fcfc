//! Normalization of remote HTTP statuses before they are attached to errors.

use http::StatusCode;

/// Map a raw remote status onto the status reported to callers.
///
/// The result is always in `[100, 600)`. A missing or out-of-range status, and a
/// success status on a response that carries error objects, all become
/// `502 Bad Gateway`. Anything else passes through unchanged.
#[must_use]
pub fn normalize_status(raw: Option<u16>, has_errors: bool) -> StatusCode {
    match raw {
        Some(code) if (200..300).contains(&code) && has_errors => StatusCode::BAD_GATEWAY,
        Some(code) if (100..600).contains(&code) => {
            StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        _ => StatusCode::BAD_GATEWAY,
    }
}
