//! Knowledge search over the Tavily HTTP API.
//!
//! The repair loop calls this when it cannot fix an error on its own. The
//! result is rendered as plain text: the service's aggregated answer, then a
//! numbered list of sources.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

use crate::config::SearchConfig;

pub(crate) const API_KEY_VAR: &str = "TAVILY_API_KEY";

const MAX_ATTEMPTS: u32 = 3;

/// Errors from the search service.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SearchError {
    #[error("TAVILY_API_KEY is not set")]
    MissingApiKey,

    #[error("Search query is empty")]
    EmptyQuery,

    #[error("Search request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Search service returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Anything that answers a free-text query with text.
#[async_trait]
pub(crate) trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<String, SearchError>;
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: u32,
    topic: &'a str,
    include_answer: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Tavily search client.
pub(crate) struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    config: SearchConfig,
    retry_delay: Duration,
}

impl TavilySearch {
    pub fn new(config: SearchConfig, api_key: impl Into<String>) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            config,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Reads the API key from `TAVILY_API_KEY`.
    pub fn from_env(config: SearchConfig) -> Result<Self, SearchError> {
        let api_key = std::env::var(API_KEY_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(SearchError::MissingApiKey)?;
        Self::new(config, api_key)
    }

    #[cfg(test)]
    fn without_retry_delay(mut self) -> Self {
        self.retry_delay = Duration::ZERO;
        self
    }

    /// POSTs the query, retrying on 5xx, 429 and network errors.
    #[allow(tail_expr_drop_order)]
    async fn post(&self, query: &str) -> Result<SearchResponse, SearchError> {
        let request = SearchRequest {
            query,
            max_results: self.config.max_results,
            topic: &self.config.topic,
            include_answer: self.config.include_answer,
        };

        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = self.retry_delay * (1 << attempt);
                debug!("Search retry attempt {} after {:?}", attempt + 1, delay);
                tokio::time::sleep(delay).await;
            }

            let sent = self
                .client
                .post(&self.config.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await;

            match sent {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json::<SearchResponse>().await?);
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    let err = SearchError::Api {
                        status: status.as_u16(),
                        body,
                    };
                    // Client errors other than rate limiting won't improve on retry
                    if !(status.is_server_error() || status.as_u16() == 429) {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
                Err(e) => last_error = Some(SearchError::Request(e)),
            }
        }

        Err(last_error.unwrap_or(SearchError::Api {
            status: 0,
            body: "no attempt made".to_string(),
        }))
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str) -> Result<String, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        debug!("Searching: {}", query);
        let response = self.post(query).await?;
        Ok(render(&response))
    }
}

fn render(response: &SearchResponse) -> String {
    let mut out = String::new();
    if let Some(answer) = response.answer.as_deref().filter(|a| !a.trim().is_empty()) {
        let _ = writeln!(out, "Answer: {}", answer.trim());
    }
    if response.results.is_empty() {
        if out.is_empty() {
            out.push_str("No results found.");
        }
        return out.trim_end().to_string();
    }
    if !out.is_empty() {
        out.push('\n');
    }
    for (i, hit) in response.results.iter().enumerate() {
        let _ = writeln!(out, "{}. {} ({})", i + 1, hit.title.trim(), hit.url);
        if !hit.content.trim().is_empty() {
            let _ = writeln!(out, "   {}", hit.content.trim());
        }
    }
    out.trim_end().to_string()
}
