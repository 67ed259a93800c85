//! Collection pagination over `links.next`

use pco_sdk_core::{Resource, Result};
use std::time::Duration;
use tracing::debug;

use crate::pipeline::RequestPipeline;
use crate::request::RequestOptions;

#[derive(Debug, Clone)]
pub struct PaginationOptions {
    pub per_page: u32,
    /// Stop after this many pages; `None` fetches everything
    pub max_pages: Option<u32>,
    /// Pause between page requests
    pub page_delay: Duration,
    /// Related resources to side-load (`include=`)
    pub include: Vec<String>,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            per_page: 100,
            max_pages: None,
            page_delay: Duration::from_millis(50),
            include: Vec::new(),
        }
    }
}

impl PaginationOptions {
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    pub fn with_include(mut self, include: impl Into<String>) -> Self {
        self.include.push(include.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaginatedResult {
    pub data: Vec<Resource>,
    pub included: Vec<Resource>,
    pub total_count: Option<u64>,
    pub pages_fetched: u32,
}

/// Fetch every page of a collection.
///
/// Stops when the server stops returning a `next` link, when a page comes
/// back empty, or at `max_pages`.
pub async fn paginate(
    pipeline: &RequestPipeline,
    endpoint: &str,
    query: Vec<(String, String)>,
    options: &PaginationOptions,
) -> Result<PaginatedResult> {
    let mut result = PaginatedResult::default();

    let mut request = RequestOptions::get(endpoint).query("per_page", options.per_page.to_string());
    for (key, value) in query {
        request = request.query(key, value);
    }
    if !options.include.is_empty() {
        request = request.query("include", options.include.join(","));
    }

    let mut next = Some(request);
    while let Some(request) = next.take() {
        let document = pipeline.execute(request).await?.document()?;
        result.pages_fetched += 1;

        if result.total_count.is_none() {
            result.total_count = document.total_count();
        }
        let next_link = document.next_link().map(str::to_string);
        let included = document.included.clone();
        let page = document.into_resources();
        let page_len = page.len();
        result.data.extend(page);
        result.included.extend(included);

        debug!(
            endpoint = %endpoint,
            page = result.pages_fetched,
            records = page_len,
            "Fetched page"
        );

        let under_limit = options
            .max_pages
            .map_or(true, |max| result.pages_fetched < max);
        if let (Some(link), true, true) = (next_link, under_limit, page_len > 0) {
            if !options.page_delay.is_zero() {
                tokio::time::sleep(options.page_delay).await;
            }
            next = Some(RequestOptions::get(link));
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PaginationOptions::default();
        assert_eq!(options.per_page, 100);
        assert_eq!(options.max_pages, None);
        assert_eq!(options.page_delay, Duration::from_millis(50));
        assert_eq!(PaginationOptions::default().with_per_page(0).per_page, 1);
    }
}
