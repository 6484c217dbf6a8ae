//! captain-byte - multi-agent pirate chat server

mod auth;
mod config;
mod server;
mod store;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use byte_agent::chat::CAPTAIN_BYTE_PERSONA;
use byte_agent::tools::{NewsTool, WeatherTool};
use byte_agent::{
    ChatGraph, ChatService, EventSink, GraphConfig, MemoryManager, ProviderTransport,
    ServiceConfig, TurnEvent, User,
};
use byte_ai::providers::{get_api_key, openai::OpenAIProvider};
use byte_ai::{Model, RequestOptions};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::auth::TokenAuthenticator;
use crate::config::{Config, Service};
use crate::server::AppState;
use crate::store::SqliteStore;

/// Captain Byte, a pirate assistant that knows the weather and the news
#[derive(Parser, Debug)]
#[command(name = "captain-byte")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: ~/.config/captain-byte/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP chat server
    Serve {
        /// Listen address, overrides `server.addr`
        #[arg(long)]
        addr: Option<String>,
    },
    /// Send one message and stream the reply to stdout
    Chat {
        /// Conversation owner
        #[arg(short, long, default_value = "local")]
        user: String,
        message: String,
    },
    /// Delete a user's conversation
    Clear {
        #[arg(short, long, default_value = "local")]
        user: String,
    },
    /// Write an example config file
    InitConfig,
}

fn init_tracing(config: &Config, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("byte_cli=debug,byte_agent=debug,byte_ai=debug")
        } else {
            EnvFilter::new(&config.logging.filter)
        }
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_memory(config: &Config) -> anyhow::Result<MemoryManager> {
    let db_path = config.database_path();
    let store = SqliteStore::new(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    tracing::debug!("using database {}", db_path.display());
    let memory = MemoryManager::new(Arc::new(store));
    Ok(match &config.database.session_title {
        Some(title) => memory.with_session_title(title),
        None => memory,
    })
}

fn build_service(config: &Config) -> anyhow::Result<ChatService> {
    let api_key = get_api_key(
        config.api_key(Service::OpenAI).as_deref(),
        Service::OpenAI.env_var(),
    )
    .with_context(|| format!("no OpenAI key; set {}", Service::OpenAI.env_var()))?;

    let mut model = Model::openai(&config.model);
    if let Some(base_url) = &config.base_url {
        model = model.with_base_url(base_url);
    }
    let transport = ProviderTransport::new(Arc::new(OpenAIProvider::new(api_key)), model);
    let options = RequestOptions {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        ..Default::default()
    };

    let mut weather = WeatherTool::new(config.api_key(Service::OpenWeather));
    if let Some(url) = &config.tools.weather_base_url {
        weather = weather.with_base_url(url);
    }
    let mut news = NewsTool::new(config.api_key(Service::NewsApi))
        .with_max_headlines(config.tools.max_headlines);
    if let Some(url) = &config.tools.news_base_url {
        news = news.with_base_url(url);
    }
    if config.api_key(Service::OpenWeather).is_none() {
        tracing::warn!("no weather key; set {}", Service::OpenWeather.env_var());
    }
    if config.api_key(Service::NewsApi).is_none() {
        tracing::warn!("no news key; set {}", Service::NewsApi.env_var());
    }

    let graph = ChatGraph::new(
        GraphConfig {
            persona: config
                .graph
                .persona
                .clone()
                .unwrap_or_else(|| CAPTAIN_BYTE_PERSONA.to_string()),
            recursion_limit: config.graph.recursion_limit,
            summary: config.summary.clone(),
        },
        Arc::new(weather),
        Arc::new(news),
    );

    Ok(ChatService::new(
        graph,
        open_memory(config)?,
        Arc::new(transport),
        options,
        ServiceConfig {
            turn_timeout: config.turn_timeout(),
        },
    ))
}

async fn serve(config: &Config, addr: Option<String>) -> anyhow::Result<()> {
    if config.auth.tokens.is_empty() {
        tracing::warn!("no [auth.tokens] configured; every chat request will be rejected");
    }
    let state = AppState {
        service: Arc::new(build_service(config)?),
        auth: Arc::new(TokenAuthenticator::new(config.auth.tokens.clone())),
        max_message_chars: config.server.max_message_chars,
    };

    let addr = addr.unwrap_or_else(|| config.server.addr.clone());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    server::serve(listener, state).await
}

async fn chat(config: &Config, user: String, message: String) -> anyhow::Result<()> {
    let service = build_service(config)?;
    let (sink, mut rx) = EventSink::channel();
    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::Token { text } => {
                    let _ = write!(stdout, "{}", text);
                    let _ = stdout.flush();
                }
                TurnEvent::ToolStart {
                    label, arguments, ..
                } => {
                    eprintln!("[{} {}]", label, arguments);
                }
                _ => {}
            }
        }
        println!();
    });

    let result = service
        .run_turn(&User::new(user), message, sink, cancel)
        .await;
    let _ = printer.await;

    let outcome = result?;
    tracing::debug!(calls = ?outcome.agent_calls, "agents used");
    Ok(())
}

async fn clear(config: &Config, user: String) -> anyhow::Result<()> {
    let outcome = open_memory(config)?.clear_state(&user).await;
    match outcome.error {
        None => {
            println!("Cleared conversation for {}", user);
            Ok(())
        }
        Some(e) => anyhow::bail!("failed to clear conversation for {}: {}", user, e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Command::InitConfig = args.command {
        let path = Config::init(args.config.as_deref())?;
        println!("Config file at: {}", path.display());
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;
    init_tracing(&config, args.verbose);

    match args.command {
        Command::Serve { addr } => serve(&config, addr).await,
        Command::Chat { user, message } => chat(&config, user, message).await,
        Command::Clear { user } => clear(&config, user).await,
        Command::InitConfig => Ok(()),
    }
}
