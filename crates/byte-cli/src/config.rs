//! Configuration file support

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use byte_agent::{MIN_KEEP_RECENT, MIN_RECURSION_LIMIT, SummaryConfig};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "CAPTAIN_BYTE_CONFIG";

/// Configuration for captain-byte
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat Completions model id
    pub model: String,
    /// OpenAI-compatible endpoint, e.g. a local proxy
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// API keys (alternative to environment variables)
    pub api_keys: ApiKeys,
    pub tools: ToolsConfig,
    pub summary: SummaryConfig,
    pub graph: GraphSection,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            temperature: Some(0.7),
            max_tokens: None,
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            api_keys: ApiKeys::default(),
            tools: ToolsConfig::default(),
            summary: SummaryConfig::default(),
            graph: GraphSection::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub max_message_chars: usize,
    /// Whole-turn time budget; 0 disables it
    pub turn_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_string(),
            max_message_chars: 4000,
            turn_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to `<data_dir>/captain-byte/chat.db`
    pub path: Option<PathBuf>,
    /// Title stored for new chats; defaults to "New Chat"
    pub session_title: Option<String>,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub openweather: Option<String>,
    pub newsapi: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub weather_base_url: Option<String>,
    pub news_base_url: Option<String>,
    pub max_headlines: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            weather_base_url: None,
            news_base_url: None,
            max_headlines: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSection {
    pub recursion_limit: usize,
    /// Replaces the built-in Captain Byte persona
    pub persona: Option<String>,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            recursion_limit: 10,
            persona: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token to user id
    pub tokens: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` wins when set
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "byte_cli=info,byte_agent=info,byte_ai=warn".to_string(),
            json: false,
        }
    }
}

/// Which external service a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    OpenAI,
    OpenWeather,
    NewsApi,
}

impl Service {
    pub fn env_var(&self) -> &'static str {
        match self {
            Service::OpenAI => "OPENAI_API_KEY",
            Service::OpenWeather => "OPENWEATHER_API_KEY",
            Service::NewsApi => "NEWSAPI_API_KEY",
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("captain-byte")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load from `path`, or the default location. A missing default file
    /// yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::config_path(), false),
        };
        if !path.exists() {
            anyhow::ensure!(!explicit, "config file not found: {}", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every turn fail or drop the reply
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.summary.keep_recent >= MIN_KEEP_RECENT,
            "summary.keep_recent must be at least {}",
            MIN_KEEP_RECENT
        );
        anyhow::ensure!(
            self.graph.recursion_limit >= MIN_RECURSION_LIMIT,
            "graph.recursion_limit must be at least {}",
            MIN_RECURSION_LIMIT
        );
        Ok(())
    }

    /// Write the example config if no file exists yet
    pub fn init(path: Option<&Path>) -> std::io::Result<PathBuf> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    /// Get an API key, checking config then env
    pub fn api_key(&self, service: Service) -> Option<String> {
        let from_config = match service {
            Service::OpenAI => self.api_keys.openai.clone(),
            Service::OpenWeather => self.api_keys.openweather.clone(),
            Service::NewsApi => self.api_keys.newsapi.clone(),
        };
        from_config
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(service.env_var()).ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("captain-byte")
                .join("chat.db")
        })
    }

    pub fn turn_timeout(&self) -> Option<Duration> {
        (self.server.turn_timeout_secs > 0)
            .then(|| Duration::from_secs(self.server.turn_timeout_secs))
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# captain-byte configuration file
# Place at ~/.config/captain-byte/config.toml (Linux) or point CAPTAIN_BYTE_CONFIG at it

# Chat Completions model
model = "gpt-4o-mini"
temperature = 0.7
# base_url = "https://api.openai.com/v1"

[server]
addr = "127.0.0.1:3000"
max_message_chars = 4000
# Seconds; 0 disables the limit
turn_timeout_secs = 60

[database]
# path = "/var/lib/captain-byte/chat.db"
# session_title = "New Chat"

# API keys (optional - OPENAI_API_KEY, OPENWEATHER_API_KEY and NEWSAPI_API_KEY also work)
[api_keys]
# openai = "sk-..."
# openweather = "..."
# newsapi = "..."

[tools]
max_headlines = 5

[summary]
enabled = true
keep_recent = 5

# Summarize once the history reaches `threshold` messages...
[summary.trigger]
rule = "message_count"
threshold = 8
# ...or every `every` turns from `min_turn` on:
# rule = "turn_periodic"
# min_turn = 10
# every = 5

[graph]
recursion_limit = 10

# Bearer token -> user id
[auth.tokens]
# "change-me" = "captain"

[logging]
filter = "byte_cli=info,byte_agent=info,byte_ai=warn"
json = false
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use byte_agent::SummaryTrigger;

    #[test]
    fn test_example_config_parses_to_defaults() {
        let config = Config::parse(example_config()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.model, defaults.model);
        assert_eq!(config.server.max_message_chars, 4000);
        assert_eq!(config.summary, SummaryConfig::default());
        assert_eq!(config.graph.recursion_limit, 10);
        assert!(config.auth.tokens.is_empty());
        assert_eq!(config.turn_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_partial_config() {
        let config = Config::parse(
            r#"
            model = "gpt-4o"

            [server]
            turn_timeout_secs = 0

            [summary.trigger]
            rule = "turn_periodic"
            min_turn = 10
            every = 5

            [auth.tokens]
            "secret" = "alice"
            "#,
        )
        .unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.server.addr, "127.0.0.1:3000");
        assert_eq!(config.turn_timeout(), None);
        assert_eq!(
            config.summary.trigger,
            SummaryTrigger::TurnPeriodic {
                min_turn: 10,
                every: 5
            }
        );
        assert_eq!(config.summary.keep_recent, 5);
        assert_eq!(config.auth.tokens["secret"], "alice");
    }

    #[test]
    fn test_unknown_trigger_rule_is_rejected() {
        let err = Config::parse("[summary.trigger]\nrule = \"always\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_zero_keep_recent() {
        let err = Config::parse("[summary]\nkeep_recent = 0\n").unwrap_err();
        assert!(err.to_string().contains("summary.keep_recent"), "got: {}", err);
        assert!(Config::parse("[summary]\nkeep_recent = 1\n").is_ok());
    }

    #[test]
    fn test_rejects_recursion_limit_below_longest_path() {
        for limit in [0, 3] {
            let err = Config::parse(&format!("[graph]\nrecursion_limit = {}\n", limit))
                .unwrap_err();
            assert!(err.to_string().contains("graph.recursion_limit"), "got: {}", err);
        }
        let config = Config::parse("[graph]\nrecursion_limit = 4\n").unwrap();
        assert_eq!(config.graph.recursion_limit, 4);
    }

    #[test]
    fn test_api_key_prefers_config() {
        let config = Config {
            api_keys: ApiKeys {
                newsapi: Some("from-config".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            config.api_key(Service::NewsApi).as_deref(),
            Some("from-config")
        );
    }

    #[test]
    fn test_load_and_init() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        assert!(Config::load(Some(&path)).is_err());

        let written = Config::init(Some(&path)).unwrap();
        assert_eq!(written, path);
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.tools.max_headlines, 5);

        fs::write(&path, "model = [").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to parse"));
    }
}
