use serde::Serialize;

/// Encode flat query parameters as `application/x-www-form-urlencoded`.
///
/// Nested JSON:API parameters are passed with bracketed keys, e.g.
/// `[("filter[id]", "1,2"), ("page[size]", "50")]`.
///
/// # Errors
/// When `params` is not a flat sequence of key/value pairs or a flat struct/map.
pub fn encode_query<T>(params: &T) -> Result<String, serde_urlencoded::ser::Error>
where
    T: Serialize + ?Sized,
{
    serde_urlencoded::to_string(params)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn encodes_bracketed_keys() {
        let query = encode_query(&[("filter[id]", "1,2"), ("page[size]", "50")]).unwrap();
        assert_eq!(query, "filter%5Bid%5D=1%2C2&page%5Bsize%5D=50");
    }

    #[test]
    fn encodes_structs() {
        #[derive(Serialize)]
        struct Search<'a> {
            q: &'a str,
            limit: u32,
        }
        let query = encode_query(&Search { q: "red shoes", limit: 10 }).unwrap();
        assert_eq!(query, "q=red+shoes&limit=10");
    }

    #[test]
    fn rejects_nested_values() {
        let nested = serde_json::json!({"filter": {"id": [1, 2]}});
        assert!(encode_query(&nested).is_err());
    }
}
