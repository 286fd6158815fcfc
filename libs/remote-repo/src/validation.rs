//! Safety checks for paths that end up in outbound GET URLs.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

static PROTOCOL_PREFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").ok());

const TRAVERSAL_MARKERS: &[&str] = &[
    "../",
    "..\\",
    "%2e%2e%2f",
    "%2e%2e/",
    "..%2f",
    "%2e%2e%5c",
    "%2e%2e\\",
    "..%5c",
    ".%2e/",
    "%2e./",
    "%252e%252e%252f",
    "%252e%252e/",
    "..%252f",
    "%252e%252e%255c",
    "..%255c",
];

const INJECTION_CHARS: &[char] = &['<', '>', '"', '\'', '`'];

const DANGEROUS_SCHEMES: &[&str] = &["javascript:", "data:", "vbscript:", "file:"];

/// Whether `path` is safe to embed verbatim in a GET URL.
///
/// Rejects empty input, NUL bytes (raw or `%00`), directory traversal in raw,
/// percent-encoded and double-encoded form, markup and quote characters,
/// script-capable URI schemes, double encoding, characters outside the
/// RFC 3986 URI set (`%` escapes allowed), and `//` anywhere except right
/// after a leading `scheme:`. `%20` and `[]` are allowed.
///
/// The length limit is not checked here; see
/// [`RemoteClient::allowed_get_request`](crate::RemoteClient::allowed_get_request).
#[must_use]
pub fn is_safe_get_path(path: &str) -> bool {
    if path.trim().is_empty() || path.contains('\0') {
        return false;
    }

    let lowered = path.to_ascii_lowercase();
    if lowered.contains("%00") || TRAVERSAL_MARKERS.iter().any(|m| lowered.contains(m)) {
        return false;
    }

    if !path.chars().all(is_uri_char) || !has_valid_escapes(path) {
        return false;
    }

    let Some(once) = decode(path) else {
        return false;
    };
    let Some(twice) = decode(&once) else {
        return false;
    };
    if once != twice {
        tracing::debug!(path, "rejecting double-encoded path");
        return false;
    }

    let decoded = once.to_ascii_lowercase();
    for form in [lowered.as_str(), decoded.as_str()] {
        if form.contains("../") || form.contains("..\\") || form.contains('\0') {
            return false;
        }
        if form.contains(INJECTION_CHARS) {
            return false;
        }
        if DANGEROUS_SCHEMES.iter().any(|s| form.contains(s)) {
            return false;
        }
    }

    !has_stray_double_slash(path)
}

fn decode(input: &str) -> Option<Cow<'_, str>> {
    urlencoding::decode(input).ok()
}

// RFC 3986 unreserved + reserved characters and `%`; quotes are excluded.
fn is_uri_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '-' | '.'
                | '_'
                | '~'
                | ':'
                | '/'
                | '?'
                | '#'
                | '['
                | ']'
                | '@'
                | '!'
                | '$'
                | '&'
                | '('
                | ')'
                | '*'
                | '+'
                | ','
                | ';'
                | '='
                | '%'
        )
}

fn has_valid_escapes(path: &str) -> bool {
    let bytes = path.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

fn has_stray_double_slash(path: &str) -> bool {
    let rest = PROTOCOL_PREFIX
        .as_ref()
        .and_then(|re| re.find(path))
        .map_or(path, |m| &path[m.end()..]);
    rest.contains("//")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_paths() {
        for path in [
            "/v1/products",
            "/v1/products?filter[id]=1,2,3",
            "/v1/products?filter%5Bid%5D=1%2C2",
            "/v1/search?q=red%20shoes&page[size]=50",
            "v1/users/42/orders?include=items.product",
            "https://catalog.internal/v1/products",
        ] {
            assert!(is_safe_get_path(path), "{path} should be accepted");
        }
    }

    #[test]
    fn rejects_empty_and_nul() {
        assert!(!is_safe_get_path(""));
        assert!(!is_safe_get_path("   "));
        assert!(!is_safe_get_path("/v1/products\0"));
        assert!(!is_safe_get_path("/v1/products%00.json"));
    }

    #[test]
    fn rejects_traversal_in_every_encoding() {
        for path in [
            "/v1/../admin",
            "/v1/..\\admin",
            "/v1/%2e%2e%2fadmin",
            "/v1/%2E%2E/admin",
            "/v1/..%2fadmin",
            "/v1/..%5cadmin",
            "/v1/%252e%252e%252fadmin",
            "/v1/..%252fadmin",
        ] {
            assert!(!is_safe_get_path(path), "{path} should be rejected");
        }
    }

    #[test]
    fn rejects_injection_characters() {
        for path in [
            "/v1/search?q=<script>",
            "/v1/search?q=%3Cscript%3E",
            "/v1/search?q=\"x\"",
            "/v1/search?q='x'",
            "/v1/search?q=%27x%27",
            "/v1/search?q=`x`",
        ] {
            assert!(!is_safe_get_path(path), "{path} should be rejected");
        }
    }

    #[test]
    fn rejects_script_schemes() {
        for path in [
            "javascript:alert(1)",
            "/redirect?to=JavaScript:alert(1)",
            "/redirect?to=data:text/html;base64,AAAA",
            "/redirect?to=vbscript:msgbox",
            "file:///etc/passwd",
        ] {
            assert!(!is_safe_get_path(path), "{path} should be rejected");
        }
    }

    #[test]
    fn rejects_double_encoding() {
        assert!(!is_safe_get_path("/v1/search?q=%2520"));
        assert!(!is_safe_get_path("/v1/search?q=%253Cb%253E"));
    }

    #[test]
    fn rejects_characters_outside_uri_set() {
        assert!(!is_safe_get_path("/v1/search?q=red shoes"));
        assert!(!is_safe_get_path("/v1/search?q={x}"));
        assert!(!is_safe_get_path("/v1/search?q=a|b"));
        assert!(!is_safe_get_path("/v1/caf\u{e9}"));
    }

    #[test]
    fn rejects_malformed_escapes() {
        assert!(!is_safe_get_path("/v1/search?q=%zz"));
        assert!(!is_safe_get_path("/v1/search?q=%2"));
    }

    #[test]
    fn double_slash_only_after_protocol() {
        assert!(is_safe_get_path("http://catalog.internal/v1"));
        assert!(!is_safe_get_path("/v1//products"));
        assert!(!is_safe_get_path("//evil.example/v1"));
        assert!(!is_safe_get_path("https://catalog.internal//v1"));
    }
}
