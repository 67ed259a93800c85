//! Request pipeline
//!
//! Every request passes through the shared rate limiter, carries exactly
//! one `Authorization` header and is bounded by a timeout. A 429 is retried
//! as soon as the limiter allows, without limit. A 401 under OAuth triggers
//! one token refresh and one retry. Any other non-2xx becomes a structured
//! [`ApiError`].

use pco_sdk_core::{parse_errors, wrap_body, ApiError, PcoError, Result};
use pco_sdk_monitoring::{Event, EventEmitter, EventType, MetricsCollector};
use pco_sdk_resilience::{parse_retry_after, RateLimitHeaders, RateLimiter};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::config::ClientConfig;
use crate::request::{ApiResponse, RequestOptions};

const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

struct RawResponse {
    status: u16,
    headers: HashMap<String, String>,
    data: Value,
}

pub struct RequestPipeline {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    user_agent: String,
    header_prefix: String,
    limiter: Arc<RateLimiter>,
    auth: Authenticator,
    events: EventEmitter,
    metrics: MetricsCollector,
}

impl RequestPipeline {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| PcoError::Config(format!("failed to build HTTP client: {e}")))?;
        let auth = Authenticator::new(&config.auth, config.token_url()?, http.clone());

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            user_agent: config.user_agent.clone(),
            header_prefix: config.rate_limit_header_prefix.to_ascii_lowercase(),
            limiter: Arc::new(RateLimiter::new("pco", config.rate_limit.clone())),
            auth,
            events: EventEmitter::new(),
            metrics: MetricsCollector::new(),
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }

    /// Execute one request, including its 429 and 401 recovery.
    pub async fn execute(&self, request: RequestOptions) -> Result<ApiResponse> {
        let request_id = format!("req_{}", Uuid::new_v4());
        let method = request.method.to_string();
        let started = Instant::now();

        self.events.emit(
            Event::new(EventType::RequestStart)
                .with_request_id(&request_id)
                .with_payload(json!({"method": method, "endpoint": request.endpoint})),
        );

        let result = self.dispatch(&request, &request_id).await;
        let duration = started.elapsed();
        let duration_ms = duration.as_millis() as u64;
        self.metrics
            .record(&method, &request.endpoint, duration, result.is_ok());

        match result {
            Ok(raw) => {
                debug!(
                    request_id = %request_id,
                    method = %method,
                    endpoint = %request.endpoint,
                    status = raw.status,
                    duration_ms,
                    "Request completed"
                );
                self.events.emit(
                    Event::new(EventType::RequestComplete)
                        .with_request_id(&request_id)
                        .with_payload(json!({
                            "method": method,
                            "endpoint": request.endpoint,
                            "status": raw.status,
                            "duration_ms": duration_ms,
                        })),
                );
                Ok(ApiResponse {
                    data: raw.data,
                    status: raw.status,
                    headers: raw.headers,
                    request_id,
                    duration_ms,
                })
            }
            Err(e) => {
                debug!(
                    request_id = %request_id,
                    method = %method,
                    endpoint = %request.endpoint,
                    error = %e,
                    duration_ms,
                    "Request failed"
                );
                self.events.emit(
                    Event::new(EventType::RequestError)
                        .with_request_id(&request_id)
                        .with_payload(json!({
                            "method": method,
                            "endpoint": request.endpoint,
                            "status": e.status(),
                            "category": e.category().as_str(),
                            "message": e.to_string(),
                            "duration_ms": duration_ms,
                        })),
                );
                Err(e)
            }
        }
    }

    async fn dispatch(&self, request: &RequestOptions, request_id: &str) -> Result<RawResponse> {
        let url = self.url_for(&request.endpoint);
        let body = match &request.body {
            Some(body) if request.is_mutating() => Some(wrap_body(&request.endpoint, body.clone())),
            other => other.clone(),
        };
        let mut refreshed = false;

        loop {
            self.limiter.acquire().await;
            let authorization = self.auth.authorization_header().await;
            let raw = self
                .send_once(request, &url, body.as_ref(), &authorization)
                .await?;
            let rate_limit = self.rate_limit_headers(&raw.headers);

            if raw.status == StatusCode::TOO_MANY_REQUESTS.as_u16() {
                self.limiter.apply_server_headers(&rate_limit);
                if rate_limit.retry_after.is_none() {
                    self.limiter.saturate();
                }
                let wait_ms = self.limiter.time_until_window_reset().as_millis() as u64;
                warn!(
                    request_id = %request_id,
                    endpoint = %request.endpoint,
                    wait_ms,
                    "Rate limited by server, retrying when permitted"
                );
                self.events.emit(
                    Event::new(EventType::RateLimitHit)
                        .with_request_id(request_id)
                        .with_payload(json!({"endpoint": request.endpoint, "wait_ms": wait_ms})),
                );
                self.events.emit(
                    Event::new(EventType::RateLimitWait)
                        .with_request_id(request_id)
                        .with_payload(json!({"wait_ms": wait_ms})),
                );
                continue;
            }

            self.limiter.apply_server_headers(&rate_limit);

            if raw.status == StatusCode::UNAUTHORIZED.as_u16()
                && !refreshed
                && self.auth.can_refresh()
            {
                refreshed = true;
                match self.auth.refresh(&authorization).await {
                    Ok(()) => {
                        self.events.emit(
                            Event::new(EventType::AuthRefreshSuccess).with_request_id(request_id),
                        );
                        continue;
                    }
                    Err(e) => {
                        self.events.emit(
                            Event::new(EventType::AuthRefreshFailure)
                                .with_request_id(request_id)
                                .with_payload(json!({"error": e.to_string()})),
                        );
                        return Err(self.api_error(request, raw, rate_limit, request_id));
                    }
                }
            }

            if (200..300).contains(&raw.status) {
                return Ok(raw);
            }
            return Err(self.api_error(request, raw, rate_limit, request_id));
        }
    }

    async fn send_once(
        &self,
        request: &RequestOptions,
        url: &str,
        body: Option<&Value>,
        authorization: &str,
    ) -> Result<RawResponse> {
        let timeout = request.timeout.unwrap_or(self.timeout);

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .header(AUTHORIZATION, authorization)
            .header(ACCEPT, JSON_API_CONTENT_TYPE)
            .header(USER_AGENT, &self.user_agent);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        // The pipeline's credential is the only Authorization header sent
        for (key, value) in &request.headers {
            if key.eq_ignore_ascii_case(AUTHORIZATION.as_str()) {
                continue;
            }
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder
                .header(CONTENT_TYPE, JSON_API_CONTENT_TYPE)
                .body(serde_json::to_vec(body)?);
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                })
                .collect::<HashMap<_, _>>();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, headers, text))
        };

        // Dropping the exchange future on expiry aborts the in-flight request.
        let (status, headers, text) = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) if e.is_timeout() => return Err(self.timeout_error(request, timeout)),
            Ok(Err(e)) => return Err(PcoError::Network(e.to_string())),
            Err(_) => return Err(self.timeout_error(request, timeout)),
        };

        let data = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) if (200..300).contains(&status) => {
                    return Err(PcoError::InvalidResponse(format!(
                        "response body is not JSON: {e}"
                    )))
                }
                Err(_) => Value::String(text),
            }
        };

        Ok(RawResponse {
            status,
            headers,
            data,
        })
    }

    fn timeout_error(&self, request: &RequestOptions, timeout: Duration) -> PcoError {
        warn!(
            method = %request.method,
            endpoint = %request.endpoint,
            timeout_ms = timeout.as_millis() as u64,
            "Request timed out"
        );
        PcoError::Timeout {
            method: request.method.to_string(),
            endpoint: request.endpoint.clone(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    fn rate_limit_headers(&self, headers: &HashMap<String, String>) -> RateLimitHeaders {
        let header = |suffix: &str| headers.get(&format!("{}-{suffix}", self.header_prefix));
        RateLimitHeaders {
            limit: header("limit").and_then(|v| v.trim().parse().ok()),
            period: header("period")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
            count: header("count").and_then(|v| v.trim().parse().ok()),
            retry_after: headers.get("retry-after").and_then(|v| parse_retry_after(v)),
        }
    }

    fn api_error(
        &self,
        request: &RequestOptions,
        raw: RawResponse,
        rate_limit: RateLimitHeaders,
        request_id: &str,
    ) -> PcoError {
        let status_text = StatusCode::from_u16(raw.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown Status");

        ApiError::new(raw.status, status_text)
            .with_request(request.method.as_str(), request.endpoint.clone())
            .with_errors(parse_errors(&raw.data))
            .with_rate_limit(rate_limit)
            .with_request_id(request_id)
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;

    fn pipeline() -> RequestPipeline {
        let config = ClientConfig::new(AuthConfig::personal_access_token("a", "b"))
            .with_base_url("https://api.example.test/people/v2/");
        RequestPipeline::new(&config).unwrap()
    }

    #[test]
    fn test_url_for_relative_and_absolute() {
        let pipeline = pipeline();
        assert_eq!(
            pipeline.url_for("/people"),
            "https://api.example.test/people/v2/people"
        );
        assert_eq!(
            pipeline.url_for("people/1"),
            "https://api.example.test/people/v2/people/1"
        );
        assert_eq!(
            pipeline.url_for("https://other.test/people?offset=25"),
            "https://other.test/people?offset=25"
        );
    }

    #[test]
    fn test_rate_limit_headers_use_prefix() {
        let pipeline = pipeline();
        let headers = HashMap::from([
            ("x-pco-api-request-rate-limit".to_string(), "100".to_string()),
            ("x-pco-api-request-rate-period".to_string(), "20".to_string()),
            ("x-pco-api-request-rate-count".to_string(), "12".to_string()),
            ("retry-after".to_string(), "3".to_string()),
        ]);

        let parsed = pipeline.rate_limit_headers(&headers);
        assert_eq!(parsed.limit, Some(100));
        assert_eq!(parsed.period, Some(Duration::from_secs(20)));
        assert_eq!(parsed.count, Some(12));
        assert_eq!(parsed.retry_after, Some(Duration::from_secs(3)));
        assert!(pipeline.rate_limit_headers(&HashMap::new()).is_empty());
    }
}
