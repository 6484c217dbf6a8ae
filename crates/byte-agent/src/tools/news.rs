//! Headline search through the NewsAPI `everything` endpoint

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolResult};

pub const DEFAULT_NEWS_BASE_URL: &str = "https://newsapi.org";

/// Headlines are capped to this range
pub const MIN_HEADLINES: usize = 3;
pub const MAX_HEADLINES: usize = 5;

pub struct NewsTool {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_headlines: usize,
}

impl NewsTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: super::http_client(Duration::from_secs(10)),
            base_url: DEFAULT_NEWS_BASE_URL.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            max_headlines: MAX_HEADLINES,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_headlines(mut self, max: usize) -> Self {
        self.max_headlines = max.clamp(MIN_HEADLINES, MAX_HEADLINES);
        self
    }

    async fn fetch(&self, query: &str, api_key: &str) -> Result<String, String> {
        let url = format!("{}/v2/everything", self.base_url);
        let page_size = self.max_headlines.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("pageSize", page_size.as_str()),
                ("apiKey", api_key),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("news request failed: {}", e);
                "The news service could not be reached.".to_string()
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "news service error");
            return Err(format!(
                "The news service returned an error (HTTP {}) for \"{}\".",
                status.as_u16(),
                query
            ));
        }

        let body: NewsResponse = response.json().await.map_err(|e| {
            tracing::warn!("news response unreadable: {}", e);
            "The news service sent a response that could not be read.".to_string()
        })?;

        if body.status.as_deref() == Some("error") {
            return Err(format!("The news service rejected the search for \"{}\".", query));
        }

        describe(query, &body.articles, self.max_headlines)
            .ok_or_else(|| format!("No news found for \"{}\".", query))
    }
}

#[async_trait]
impl Tool for NewsTool {
    fn name(&self) -> &str {
        "search"
    }

    fn label(&self) -> &str {
        "News"
    }

    fn description(&self) -> &str {
        "Search recent news articles and return the top headlines."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Keywords to search the news for."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let Some(query) = super::query_argument(&arguments) else {
            return ToolResult::error("No search terms were given for the news lookup.");
        };
        let Some(api_key) = self.api_key.as_deref() else {
            return ToolResult::error("News search is not configured (missing API key).");
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => ToolResult::error("News search was cancelled."),
            result = self.fetch(query, api_key) => match result {
                Ok(text) => ToolResult::text(text),
                Err(text) => ToolResult::error(text),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    status: Option<String>,
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct Article {
    title: Option<String>,
    source: Option<ArticleSource>,
}

#[derive(Debug, Deserialize)]
struct ArticleSource {
    name: Option<String>,
}

fn describe(query: &str, articles: &[Article], max: usize) -> Option<String> {
    let headlines: Vec<String> = articles
        .iter()
        .filter_map(|a| {
            let title = a.title.as_deref()?.trim();
            // NewsAPI blanks out taken-down articles
            if title.is_empty() || title == "[Removed]" {
                return None;
            }
            Some(match a.source.as_ref().and_then(|s| s.name.as_deref()) {
                Some(source) if !source.is_empty() => format!("{} ({})", title, source),
                _ => title.to_string(),
            })
        })
        .take(max)
        .enumerate()
        .map(|(i, h)| format!("{}. {}", i + 1, h))
        .collect();

    if headlines.is_empty() {
        return None;
    }
    Some(format!(
        "Top headlines for \"{}\": {}.",
        query,
        headlines.join("; ")
    ))
}
