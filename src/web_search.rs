//! Live web lookup.
//!
//! [`SerpApiSearch`] queries Google through SerpAPI and keeps at most
//! [`MAX_RESULTS`] organic results. The key is read from `SERPAPI_API_KEY`
//! when a search is made, so sessions that never search never need it.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::SearchConfig;
use crate::embedding::send_with_retry;
use crate::error::ProviderError;

/// Hard cap on results per query.
pub const MAX_RESULTS: usize = 5;

const SERPAPI_URL: &str = "https://serpapi.com/search";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// At most [`MAX_RESULTS`] results, best first.
    async fn search(&self, query: &str) -> Result<Vec<WebResult>, ProviderError>;
}

/// Always fails; used when `search.provider = "disabled"`.
pub struct DisabledSearch;

#[async_trait]
impl WebSearch for DisabledSearch {
    async fn search(&self, _query: &str) -> Result<Vec<WebResult>, ProviderError> {
        Err(ProviderError::Disabled {
            service: "web search",
        })
    }
}

pub struct SerpApiSearch {
    client: reqwest::Client,
    max_results: usize,
    timeout_secs: u64,
}

impl SerpApiSearch {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_results: config.max_results.clamp(1, MAX_RESULTS),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl WebSearch for SerpApiSearch {
    async fn search(&self, query: &str) -> Result<Vec<WebResult>, ProviderError> {
        let api_key = std::env::var("SERPAPI_API_KEY").map_err(|_| ProviderError::MissingApiKey {
            var: "SERPAPI_API_KEY",
        })?;
        let num = self.max_results.to_string();

        debug!(query, "web search");
        let response = send_with_retry("serpapi", 0, self.timeout_secs, || {
            self.client.get(SERPAPI_URL).query(&[
                ("q", query),
                ("api_key", api_key.as_str()),
                ("engine", "google"),
                ("num", num.as_str()),
            ])
        })
        .await?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid("serpapi", e.to_string()))?;
        parse_serpapi_response(&json, self.max_results)
    }
}

/// Extract `organic_results` from a SerpAPI response. A response with no
/// organic results is an empty list; an `error` field is a failure.
pub fn parse_serpapi_response(json: &Value, limit: usize) -> Result<Vec<WebResult>, ProviderError> {
    if let Some(error) = json.get("error").and_then(Value::as_str) {
        // SerpAPI reports "no results" as an error string
        if error.contains("hasn't returned any results") {
            return Ok(Vec::new());
        }
        return Err(ProviderError::invalid("serpapi", error));
    }

    let field = |item: &Value, key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Ok(json
        .get("organic_results")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .take(limit.min(MAX_RESULTS))
                .map(|item| WebResult {
                    title: field(item, "title"),
                    snippet: field(item, "snippet"),
                    url: field(item, "link"),
                })
                .collect()
        })
        .unwrap_or_default())
}

/// Render results as `Title / Snippet / URL` blocks.
pub fn format_results(results: &[WebResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }
    results
        .iter()
        .map(|r| format!("Title: {}\nSnippet: {}\nURL: {}\n", r.title, r.snippet, r.url))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn create_search(config: &SearchConfig) -> Result<Box<dyn WebSearch>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledSearch)),
        "serpapi" => Ok(Box::new(SerpApiSearch::new(config)?)),
        other => bail!("Unknown search provider: {}", other),
    }
}
