//! Tool adapters for the worker agents

pub mod news;
pub mod weather;

use std::time::Duration;

pub use news::NewsTool;
pub use weather::WeatherTool;

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// The trimmed, non-empty `query` argument
fn query_argument(arguments: &serde_json::Value) -> Option<&str> {
    arguments
        .get("query")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
}
