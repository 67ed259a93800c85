//! Request options and response envelope

use pco_sdk_core::{Document, PcoError, Resource, Result};
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// One request to execute through the pipeline
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    /// Path relative to the base URL, or an absolute URL
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Overrides the client's default timeout
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn patch(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PATCH, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the body is sent in the JSON:API envelope
    pub fn is_mutating(&self) -> bool {
        matches!(self.method, Method::POST | Method::PATCH | Method::PUT)
    }
}

/// A successful response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Parsed JSON body; `Null` for 204 or empty bodies
    pub data: Value,
    pub status: u16,
    /// Response headers with lowercase names
    pub headers: HashMap<String, String>,
    pub request_id: String,
    pub duration_ms: u64,
}

impl ApiResponse {
    pub fn document(&self) -> Result<Document> {
        Ok(Document::from_value(&self.data)?)
    }

    /// The primary resource; errors if the body has none
    pub fn resource(&self) -> Result<Resource> {
        self.document()?
            .into_resource()
            .ok_or_else(|| PcoError::InvalidResponse("response contained no resource".into()))
    }

    pub fn resources(&self) -> Result<Vec<Resource>> {
        Ok(self.document()?.into_resources())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(data: Value) -> ApiResponse {
        ApiResponse {
            data,
            status: 200,
            headers: HashMap::from([("x-request-id".to_string(), "abc".to_string())]),
            request_id: "req_1".into(),
            duration_ms: 3,
        }
    }

    #[test]
    fn test_builder() {
        let request = RequestOptions::get("/people")
            .query("per_page", "25")
            .header("X-Debug", "1")
            .timeout(Duration::from_secs(2));

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.query, vec![("per_page".to_string(), "25".to_string())]);
        assert_eq!(request.timeout, Some(Duration::from_secs(2)));
        assert!(!request.is_mutating());
        assert!(RequestOptions::patch("/people/1").is_mutating());
        assert!(!RequestOptions::delete("/people/1").is_mutating());
    }

    #[test]
    fn test_resource_helpers() {
        let one = response(json!({"data": {"type": "Person", "id": "1", "attributes": {}}}));
        assert_eq!(one.resource().unwrap().id, "1");
        assert_eq!(one.header("X-Request-Id"), Some("abc"));

        let empty = response(Value::Null);
        assert!(empty.resources().unwrap().is_empty());
        assert!(matches!(
            empty.resource().unwrap_err(),
            PcoError::InvalidResponse(_)
        ));
    }
}
