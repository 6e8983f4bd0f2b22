//! HTTP requests handed to the engine and the form encoder used to build their bodies

use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, ProviderError, Result};
use crate::retry::RetryStrategy;
use crate::service::ServiceType;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// A request for one of the HTTP services
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub service: ServiceType,
    pub method: Method,
    pub path: String,
    /// Query string pairs, appended to the path by the provider
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub is_idempotent: bool,
    pub deadline: Instant,
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,
    pub unique_id: String,
}

impl HttpRequest {
    pub fn new(service: ServiceType, method: Method, path: impl Into<String>, deadline: Instant) -> Self {
        Self {
            service,
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            content_type: None,
            is_idempotent: matches!(method, Method::Get),
            deadline,
            retry_strategy: None,
            unique_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Attach a body; a body always needs a content type
    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Result<Self> {
        if content_type.is_empty() {
            return Err(Error::invalid_argument(
                "content type must be specified for a request with a body",
            ));
        }
        self.content_type = Some(content_type.to_string());
        self.body = Some(body);
        Ok(self)
    }

    pub fn with_form(self, form: &FormBody) -> Result<Self> {
        self.with_body(FORM_CONTENT_TYPE, form.encode().into_bytes())
    }

    pub fn with_json<T: serde::Serialize>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        self.with_body(JSON_CONTENT_TYPE, body)
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    pub fn idempotent(mut self, is_idempotent: bool) -> Self {
        self.is_idempotent = is_idempotent;
        self
    }

    pub fn with_retry_strategy(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }

    /// Path plus encoded query string
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let mut form = FormBody::new();
        for (k, v) in &self.query {
            form.add(k, v);
        }
        format!("{}?{}", self.path, form.encode())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Endpoint that served the request, e.g. `http://10.0.0.1:8093`
    pub endpoint: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, lossy for non-UTF-8 bodies
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// The HTTP dispatch half of the engine
#[async_trait::async_trait]
pub trait HttpProvider: Send + Sync {
    async fn do_http_request(&self, request: HttpRequest) -> std::result::Result<HttpResponse, ProviderError>;
}

/// An `application/x-www-form-urlencoded` body
#[derive(Debug, Clone, Default)]
pub struct FormBody {
    pairs: Vec<(String, String)>,
}

impl FormBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Encode sorted by key; values under the same key keep insertion order
    pub fn encode(&self) -> String {
        let mut sorted: Vec<&(String, String)> = self.pairs.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(sorted.into_iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_form_encoding_sorts_and_escapes() {
        let mut form = FormBody::new();
        form.add("roles", "bucket_admin[travel-sample],ro_admin")
            .add("name", "Jane Doe")
            .add("password", "p&ss=word");
        assert_eq!(
            form.encode(),
            "name=Jane+Doe&password=p%26ss%3Dword&roles=bucket_admin%5Btravel-sample%5D%2Cro_admin"
        );
    }

    #[test]
    fn test_form_keeps_repeated_keys_in_order() {
        let mut form = FormBody::new();
        form.add("z", "1").add("a", "x*y~").add("z", "0").add("a", "é");
        assert_eq!(form.encode(), "a=x*y%7E&a=%C3%A9&z=1&z=0");
    }

    #[test]
    fn test_body_requires_content_type() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let req = HttpRequest::new(ServiceType::Management, Method::Post, "/x", deadline);
        let err = req.with_body("", b"a=b".to_vec()).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_get_requests_default_to_idempotent() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let get = HttpRequest::new(ServiceType::Management, Method::Get, "/x", deadline);
        let delete = HttpRequest::new(ServiceType::Management, Method::Delete, "/x", deadline);
        assert!(get.is_idempotent);
        assert!(!delete.is_idempotent);
        assert_ne!(get.unique_id, delete.unique_id);
    }

    #[test]
    fn test_path_and_query() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let req = HttpRequest::new(ServiceType::Views, Method::Get, "/beer/_design/d/_view/v", deadline)
            .with_query(vec![
                ("stale".to_string(), "false".to_string()),
                ("key".to_string(), "\"abc\"".to_string()),
            ]);
        assert_eq!(
            req.path_and_query(),
            "/beer/_design/d/_view/v?key=%22abc%22&stale=false"
        );
    }
}
