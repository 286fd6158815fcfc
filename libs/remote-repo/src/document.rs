//! Minimal JSON:API document model.
//!
//! Only the parts the client inspects are typed: primary data, error objects and
//! the resource envelope. Everything else is kept as raw JSON.

use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Top-level JSON:API document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PrimaryData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorObject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
}

/// Primary data of a document: a single resource or a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Many(Vec<Resource>),
    One(Box<Resource>),
}

impl PrimaryData {
    /// Resources in document order.
    #[must_use]
    pub fn resources(&self) -> &[Resource] {
        match self {
            Self::Many(items) => items,
            Self::One(item) => std::slice::from_ref(item),
        }
    }

    #[must_use]
    pub fn into_resources(self) -> Vec<Resource> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![*item],
        }
    }
}

/// A resource object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Resource {
    #[must_use]
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            attributes: Map::new(),
            relationships: None,
            links: None,
            meta: None,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Deserialize the attributes object into a typed struct.
    ///
    /// # Errors
    /// Returns the `serde_json` error when the attributes do not match `T`.
    pub fn attributes_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(Value::Object(self.attributes.clone()))
    }
}

/// A JSON:API error object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ErrorObject {
    #[must_use]
    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::default()
        }
    }

    /// Human readable message: `detail`, then `title`, then `code`.
    #[must_use]
    pub fn message(&self) -> String {
        self.detail
            .as_deref()
            .or(self.title.as_deref())
            .or(self.code.as_deref())
            .unwrap_or("Unknown error")
            .to_owned()
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DocumentError {
    #[error("response body is not valid JSON:API: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response document has none of the top-level members data, errors or meta")]
    MissingTopLevelMember,
}

impl Document {
    /// A document carrying only the given error objects.
    #[must_use]
    pub fn from_errors(errors: Vec<ErrorObject>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }

    /// Parse a response body. An empty body is an empty document.
    ///
    /// # Errors
    /// Returns [`DocumentError`] when the body is not JSON or not a JSON:API
    /// envelope.
    pub fn from_slice(body: &[u8]) -> Result<Self, DocumentError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let raw: Map<String, Value> = serde_json::from_slice(body)?;
        if !["data", "errors", "meta"].iter().any(|k| raw.contains_key(*k)) {
            return Err(DocumentError::MissingTopLevelMember);
        }
        Ok(serde_json::from_value(Value::Object(raw))?)
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Messages of all error objects, in document order.
    #[must_use]
    pub fn error_details(&self) -> Vec<String> {
        self.errors.iter().map(ErrorObject::message).collect()
    }
}

/// A parsed response as seen by the client.
///
/// `status` is `None` when the transport produced no underlying HTTP response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentResponse {
    pub status: Option<StatusCode>,
    pub document: Document,
}

impl DocumentResponse {
    #[must_use]
    pub fn new(status: StatusCode, document: Document) -> Self {
        Self {
            status: Some(status),
            document,
        }
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.document.has_errors()
    }

    #[must_use]
    pub fn raw_status(&self) -> Option<u16> {
        self.status.map(|s| s.as_u16())
    }

    /// A response below 400 without error objects. An error status counts as
    /// a failure even when the body carries no error objects.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status
            .is_some_and(|s| !s.is_client_error() && !s.is_server_error())
            && !self.has_errors()
    }
}

/// A remote error that callers handle as ordinary control flow.
///
/// Produced instead of an error when one of the configured recoverable
/// patterns matches an error detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverableError {
    pub status: StatusCode,
    pub details: Vec<String>,
    pub matched_pattern: String,
}

/// Outcome of [`RemoteClient::get`](crate::RemoteClient::get).
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Document(DocumentResponse),
    Recoverable(RecoverableError),
}

impl Fetched {
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable(_))
    }

    #[must_use]
    pub fn into_document(self) -> Option<DocumentResponse> {
        match self {
            Self::Document(doc) => Some(doc),
            Self::Recoverable(_) => None,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_collection() {
        let body = json!({
            "data": [
                {"type": "products", "id": "1", "attributes": {"name": "Lamp"}},
                {"type": "products", "id": 2}
            ],
            "meta": {"total": 2}
        });
        let doc = Document::from_slice(body.to_string().as_bytes()).unwrap();
        let data = doc.data.unwrap();
        let items = data.resources();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].attribute("name"), Some(&json!("Lamp")));
        assert_eq!(items[1].id, "2");
    }

    #[test]
    fn parses_single_resource() {
        let body = br#"{"data": {"type": "users", "id": "7"}}"#;
        let doc = Document::from_slice(body).unwrap();
        match doc.data {
            Some(PrimaryData::One(user)) => assert_eq!(user.id, "7"),
            other => panic!("unexpected data: {other:?}"),
        }
    }

    #[test]
    fn null_data_is_none() {
        let doc = Document::from_slice(br#"{"data": null}"#).unwrap();
        assert!(doc.data.is_none());
    }

    #[test]
    fn parses_errors_with_numeric_status() {
        let body = br#"{"errors": [{"status": 404, "title": "Not Found", "detail": "No product 9"}, {"code": "E42"}]}"#;
        let doc = Document::from_slice(body).unwrap();
        assert!(doc.has_errors());
        assert_eq!(doc.errors[0].status.as_deref(), Some("404"));
        assert_eq!(doc.error_details(), vec!["No product 9", "E42"]);
    }

    #[test]
    fn empty_body_is_empty_document() {
        assert_eq!(Document::from_slice(b"").unwrap(), Document::default());
        assert_eq!(Document::from_slice(b"  \n").unwrap(), Document::default());
    }

    #[test]
    fn rejects_non_envelope() {
        assert!(matches!(
            Document::from_slice(br#"{"items": []}"#),
            Err(DocumentError::MissingTopLevelMember)
        ));
        assert!(matches!(
            Document::from_slice(b"<html>502 Bad Gateway</html>"),
            Err(DocumentError::Json(_))
        ));
        assert!(matches!(
            Document::from_slice(b"[1, 2]"),
            Err(DocumentError::Json(_))
        ));
    }

    #[test]
    fn typed_attributes() {
        #[derive(Deserialize)]
        struct Product {
            name: String,
            price: u32,
        }

        let item = Resource::new("products", "1")
            .with_attribute("name", "Lamp")
            .with_attribute("price", 1999);
        let product: Product = item.attributes_as().unwrap();
        assert_eq!(product.name, "Lamp");
        assert_eq!(product.price, 1999);
    }

    #[test]
    fn error_message_fallbacks() {
        assert_eq!(ErrorObject::default().message(), "Unknown error");
        let err = ErrorObject {
            title: Some("Gone".to_owned()),
            ..ErrorObject::default()
        };
        assert_eq!(err.message(), "Gone");
    }

    #[test]
    fn fetched_helpers() {
        let fetched = Fetched::Document(DocumentResponse::new(StatusCode::OK, Document::default()));
        assert!(!fetched.is_recoverable());
        assert!(fetched.into_document().is_some());
    }

    #[test]
    fn error_status_without_error_objects_is_not_success() {
        let empty = |code| DocumentResponse::new(code, Document::default());
        assert!(empty(StatusCode::OK).is_success());
        assert!(empty(StatusCode::NO_CONTENT).is_success());
        assert!(!empty(StatusCode::NOT_FOUND).is_success());
        assert!(!empty(StatusCode::SERVICE_UNAVAILABLE).is_success());

        let no_response = DocumentResponse {
            status: None,
            document: Document::default(),
        };
        assert!(!no_response.is_success());
    }
}
