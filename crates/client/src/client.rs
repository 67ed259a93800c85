//! Top-level client handle

use pco_sdk_core::{PcoError, Result};
use pco_sdk_monitoring::{EventEmitter, MetricsSnapshot};
use pco_sdk_resilience::{RateLimiter, RetryConfig, RetryError, RetryExecutor};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::pagination::{paginate, PaginatedResult, PaginationOptions};
use crate::people::PeopleModule;
use crate::pipeline::RequestPipeline;
use crate::request::{ApiResponse, RequestOptions};

/// Cheaply cloneable handle to one configured client.
///
/// Clones share the rate limiter, credentials, events and metrics.
#[derive(Clone)]
pub struct PcoClient {
    pipeline: Arc<RequestPipeline>,
}

impl PcoClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            pipeline: Arc::new(RequestPipeline::new(&config)?),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub async fn execute(&self, request: RequestOptions) -> Result<ApiResponse> {
        self.pipeline.execute(request).await
    }

    pub async fn get(&self, endpoint: &str) -> Result<ApiResponse> {
        self.execute(RequestOptions::get(endpoint)).await
    }

    pub async fn post(&self, endpoint: &str, body: Value) -> Result<ApiResponse> {
        self.execute(RequestOptions::post(endpoint).body(body)).await
    }

    pub async fn patch(&self, endpoint: &str, body: Value) -> Result<ApiResponse> {
        self.execute(RequestOptions::patch(endpoint).body(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<ApiResponse> {
        self.execute(RequestOptions::delete(endpoint)).await
    }

    pub async fn paginate(
        &self,
        endpoint: &str,
        query: Vec<(String, String)>,
        options: &PaginationOptions,
    ) -> Result<PaginatedResult> {
        paginate(&self.pipeline, endpoint, query, options).await
    }

    pub fn people(&self) -> PeopleModule {
        PeopleModule::new(self.pipeline.clone())
    }

    pub fn events(&self) -> &EventEmitter {
        self.pipeline.events()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.pipeline.metrics().snapshot()
    }

    pub fn reset_metrics(&self) {
        self.pipeline.metrics().reset();
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        self.pipeline.limiter()
    }

    /// Run `operation` with exponential backoff on retryable errors.
    ///
    /// Independent of the pipeline's own 429/401 handling; the last error is
    /// returned once retries are exhausted.
    pub async fn with_retry<F, Fut, T>(&self, config: RetryConfig, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        RetryExecutor::new(config)
            .run("pco_request", operation)
            .await
            .map_err(RetryError::<PcoError>::into_inner)
    }
}
