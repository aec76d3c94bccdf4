//! Web search client with exponential backoff, full jitter, and a textual
//! retryability classifier.
//!
//! The underlying provider is reached over HTTP through [`SearchProvider`]; retry
//! policy is a decorator around it ([`RetryingSearchClient`]) so the backoff logic
//! is tested once and shared regardless of which concrete provider is wired in.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const MAX_RETRIES: u32 = 3;
const BASE_DELAY_SECS: f64 = 1.0;
const MAX_DELAY_SECS: f64 = 30.0;

/// Substrings that mark an error as transient and worth retrying. Checked
/// case-insensitively against the error's display text, since provider SDKs don't
/// expose a uniform typed error for "rate limited" vs "bad request".
const RETRYABLE_MARKERS: &[&str] = &[
    "429", "rate", "limit", "500", "502", "503", "timeout", "connection",
];

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(String),

    #[error("search provider returned an unparseable response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub content: String,
}

/// A raw search provider. Implementations talk to one concrete backend (e.g. a
/// specific search API) and should NOT implement their own retry loop — that's
/// [`RetryingSearchClient`]'s job, applied uniformly across providers.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search_once(&self, query: &str) -> Result<Vec<SearchResult>>;
}

/// Tavily web search — the concrete backend the discovery workers run against
/// outside demo mode. Just enough surface for the `/search` endpoint's basic
/// answer mode, not a general Tavily API wrapper.
pub struct TavilySearchProvider {
    http_client: reqwest::Client,
    api_key: String,
    max_results: u32,
}

impl TavilySearchProvider {
    const API_URL: &'static str = "https://api.tavily.com/search";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            api_key: api_key.into(),
            max_results: 5,
        }
    }
}

impl Clone for TavilySearchProvider {
    fn clone(&self) -> Self {
        Self {
            http_client: self.http_client.clone(),
            api_key: self.api_key.clone(),
            max_results: self.max_results,
        }
    }
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
    include_answer: bool,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    url: String,
    title: String,
    content: String,
}

#[async_trait]
impl SearchProvider for TavilySearchProvider {
    async fn search_once(&self, query: &str) -> Result<Vec<SearchResult>> {
        let request = TavilyRequest {
            api_key: &self.api_key,
            query,
            max_results: self.max_results,
            include_answer: false,
        };

        let response = self
            .http_client
            .post(Self::API_URL)
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Request(format!("{status}: {body}")));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| SearchResult { url: r.url, title: r.title, content: r.content })
            .collect())
    }
}

fn is_retryable(err: &SearchError) -> bool {
    let text = err.to_string().to_lowercase();
    RETRYABLE_MARKERS.iter().any(|marker| text.contains(marker))
}

/// `min(base * 2^attempt, max) * (1 + uniform(0, 0.25))` — exponential backoff with
/// up to 25% jitter, so many concurrently-retrying callers don't all wake at once.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY_SECS * 2f64.powi(attempt as i32);
    let capped = exp.min(MAX_DELAY_SECS);
    let jitter = rand::thread_rng().gen_range(0.0..0.25);
    Duration::from_secs_f64(capped * (1.0 + jitter))
}

/// Wraps a [`SearchProvider`] with retry-with-backoff. On a non-retryable error, or
/// after exhausting retries, degrades to an empty result set rather than
/// propagating — a single failed query should never abort a discovery session.
pub struct RetryingSearchClient<P: SearchProvider> {
    provider: P,
    level_label: String,
}

impl<P: SearchProvider> RetryingSearchClient<P> {
    pub fn new(provider: P, level_label: impl Into<String>) -> Self {
        Self {
            provider,
            level_label: level_label.into(),
        }
    }

    pub async fn search_with_retry(&self, query: &str) -> Vec<SearchResult> {
        for attempt in 0..=MAX_RETRIES {
            match self.provider.search_once(query).await {
                Ok(results) => return results,
                Err(err) => {
                    let retryable = is_retryable(&err);
                    if !retryable || attempt >= MAX_RETRIES {
                        tracing::warn!(
                            level = %self.level_label,
                            query,
                            error = %err,
                            "search failed, giving up"
                        );
                        return Vec::new();
                    }
                    let delay = backoff_delay(attempt);
                    tracing::debug!(
                        level = %self.level_label,
                        query,
                        attempt = attempt + 1,
                        max_retries = MAX_RETRIES,
                        delay_secs = delay.as_secs_f64(),
                        "retrying search"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Vec::new()
    }

    /// Run `queries` sequentially, sleeping `inter_query_delay` between (but not
    /// after) each to avoid bursting the provider.
    pub async fn search_all(&self, queries: &[String], inter_query_delay: Duration) -> Vec<SearchResult> {
        let mut all_results = Vec::new();
        for (i, query) in queries.iter().enumerate() {
            all_results.extend(self.search_with_retry(query).await);
            if i + 1 < queries.len() {
                tokio::time::sleep(inter_query_delay).await;
            }
        }
        all_results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyProvider {
        fail_times: u32,
        attempts: Arc<AtomicU32>,
        error: fn() -> SearchError,
    }

    #[async_trait]
    impl SearchProvider for FlakyProvider {
        async fn search_once(&self, _query: &str) -> Result<Vec<SearchResult>> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err((self.error)())
            } else {
                Ok(vec![SearchResult {
                    url: "https://example.gov".to_string(),
                    title: "Example".to_string(),
                    content: "content".to_string(),
                }])
            }
        }
    }

    #[test]
    fn tavily_provider_is_cloneable_per_worker() {
        let provider = TavilySearchProvider::new("test-key");
        let _clone = provider.clone();
    }

    #[test]
    fn retryable_markers_detect_rate_limit_text() {
        let err = SearchError::Request("429 Too Many Requests".to_string());
        assert!(is_retryable(&err));
        let err = SearchError::Request("connection reset by peer".to_string());
        assert!(is_retryable(&err));
    }

    #[test]
    fn non_retryable_errors_are_not_flagged() {
        let err = SearchError::Request("invalid query syntax".to_string());
        assert!(!is_retryable(&err));
    }

    #[test]
    fn backoff_delay_is_bounded_by_max_delay() {
        for attempt in 0..10 {
            let delay = backoff_delay(attempt);
            assert!(delay.as_secs_f64() <= MAX_DELAY_SECS * 1.25 + 0.01);
        }
    }

    #[test]
    fn backoff_delay_grows_with_attempt_before_capping() {
        let first = backoff_delay(0);
        let second = backoff_delay(1);
        assert!(second.as_secs_f64() >= first.as_secs_f64());
    }

    #[tokio::test]
    async fn retries_transient_failure_and_eventually_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let provider = FlakyProvider {
            fail_times: 2,
            attempts: attempts.clone(),
            error: || SearchError::Request("503 Service Unavailable".to_string()),
        };
        let client = RetryingSearchClient::new(provider, "state");
        let results = client.search_with_retry("query").await;
        assert_eq!(results.len(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_degrades_to_empty_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let provider = FlakyProvider {
            fail_times: 100,
            attempts: attempts.clone(),
            error: || SearchError::Request("invalid api key".to_string()),
        };
        let client = RetryingSearchClient::new(provider, "state");
        let results = client.search_with_retry("query").await;
        assert!(results.is_empty());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_retries_degrades_to_empty_rather_than_erroring() {
        let attempts = Arc::new(AtomicU32::new(0));
        let provider = FlakyProvider {
            fail_times: 100,
            attempts: attempts.clone(),
            error: || SearchError::Request("500 internal error".to_string()),
        };
        let client = RetryingSearchClient::new(provider, "federal");
        let results = client.search_with_retry("query").await;
        assert!(results.is_empty());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }
}
