//! Current conditions from the OpenWeatherMap API

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolResult};

pub const DEFAULT_WEATHER_BASE_URL: &str = "https://api.openweathermap.org";

/// Looks up current weather for a city or country and describes it in one sentence
pub struct WeatherTool {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl WeatherTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: super::http_client(Duration::from_secs(10)),
            base_url: DEFAULT_WEATHER_BASE_URL.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch(&self, query: &str, api_key: &str) -> Result<String, String> {
        let url = format!("{}/data/2.5/weather", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("appid", api_key), ("units", "metric")])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("weather request failed: {}", e);
                "The weather service could not be reached.".to_string()
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(format!("No weather data found for \"{}\".", query));
        }
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "weather service error");
            return Err(format!(
                "The weather service returned an error (HTTP {}) for \"{}\".",
                status.as_u16(),
                query
            ));
        }

        let body: WeatherResponse = response.json().await.map_err(|e| {
            tracing::warn!("weather response unreadable: {}", e);
            "The weather service sent a response that could not be read.".to_string()
        })?;

        describe(query, &body).ok_or_else(|| format!("No weather data found for \"{}\".", query))
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn label(&self) -> &str {
        "Weather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a city or country."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The city or country to get the weather for."
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
            return ToolResult::error("No location was given for the weather lookup.");
        };
        let Some(api_key) = self.api_key.as_deref() else {
            return ToolResult::error("Weather lookup is not configured (missing API key).");
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => ToolResult::error("Weather lookup was cancelled."),
            result = self.fetch(query, api_key) => match result {
                Ok(text) => ToolResult::text(text),
                Err(text) => ToolResult::error(text),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    name: Option<String>,
    sys: Option<WeatherSys>,
    main: Option<WeatherMain>,
    #[serde(default)]
    weather: Vec<WeatherCondition>,
}

#[derive(Debug, Deserialize)]
struct WeatherSys {
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WeatherMain {
    temp: Option<f64>,
    feels_like: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WeatherCondition {
    description: Option<String>,
}

fn describe(query: &str, body: &WeatherResponse) -> Option<String> {
    let main = body.main.as_ref()?;
    let temp = main.temp?;

    let place = match (
        body.name.as_deref().filter(|n| !n.is_empty()),
        body.sys.as_ref().and_then(|s| s.country.as_deref()),
    ) {
        (Some(name), Some(country)) => format!("{}, {}", name, country),
        (Some(name), None) => name.to_string(),
        (None, _) => query.to_string(),
    };

    let mut sentence = format!("Current weather in {}: {:.1}°C", place, temp);
    if let Some(feels_like) = main.feels_like {
        sentence.push_str(&format!(" (feels like {:.1}°C)", feels_like));
    }
    if let Some(condition) = body
        .weather
        .first()
        .and_then(|w| w.description.as_deref())
        .filter(|d| !d.is_empty())
    {
        sentence.push_str(", ");
        sentence.push_str(condition);
    }
    if let Some(humidity) = main.humidity {
        sentence.push_str(&format!(", humidity {:.0}%", humidity));
    }
    sentence.push('.');
    Some(sentence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tool_for(server: &MockServer) -> WeatherTool {
        WeatherTool::new(Some("wx-key".into())).with_base_url(server.uri())
    }

    async fn run(tool: &WeatherTool, args: serde_json::Value) -> ToolResult {
        tool.execute("call_1", args, CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_formats_current_conditions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .and(query_param("q", "Paris"))
            .and(query_param("appid", "wx-key"))
            .and(query_param("units", "metric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "Paris",
                "sys": { "country": "FR" },
                "main": { "temp": 18.04, "feels_like": 17.2, "humidity": 72 },
                "weather": [{ "main": "Rain", "description": "light rain" }]
            })))
            .mount(&server)
            .await;

        let result = run(&tool_for(&server), serde_json::json!({"query": "Paris"})).await;
        assert!(!result.is_error);
        assert_eq!(
            result.text_content(),
            "Current weather in Paris, FR: 18.0°C (feels like 17.2°C), light rain, humidity 72%."
        );
    }

    #[tokio::test]
    async fn test_server_error_degrades_to_sentence() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(500).set_body_string("{\"cod\":500}"))
            .mount(&server)
            .await;

        let result = run(&tool_for(&server), serde_json::json!({"query": "Paris"})).await;
        assert!(result.is_error);
        let text = result.text_content();
        assert!(text.contains("HTTP 500"), "got: {}", text);
        assert!(!text.contains('{'), "raw JSON leaked: {}", text);
    }

    #[tokio::test]
    async fn test_unknown_city() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "cod": "404", "message": "city not found"
            })))
            .mount(&server)
            .await;

        let result = run(&tool_for(&server), serde_json::json!({"query": "Atlantis"})).await;
        assert!(result.is_error);
        assert_eq!(result.text_content(), "No weather data found for \"Atlantis\".");
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let result = run(&tool_for(&server), serde_json::json!({"query": "Paris"})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("could not be read"));
    }

    #[tokio::test]
    async fn test_missing_temperature_is_no_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "Paris", "weather": []
            })))
            .mount(&server)
            .await;

        let result = run(&tool_for(&server), serde_json::json!({"query": "Paris"})).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_missing_key_and_query() {
        let tool = WeatherTool::new(None);
        let result = run(&tool, serde_json::json!({"query": "Paris"})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("not configured"));

        let tool = WeatherTool::new(Some("k".into()));
        let result = run(&tool, serde_json::json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("No location"));
    }

    #[tokio::test]
    async fn test_cancelled_before_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_json(serde_json::json!({})),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = tool_for(&server)
            .execute("call_1", serde_json::json!({"query": "Paris"}), cancel)
            .await;
        assert!(result.is_error);
        assert!(result.text_content().contains("cancelled"));
    }
}
