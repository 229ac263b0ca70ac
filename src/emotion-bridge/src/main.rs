//! Emotion Bridge - relays line-delimited JSON-RPC to the emotion MCP server.
//!
//! Standard output carries protocol traffic and command results; all logging
//! goes to standard error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use emotion_mcp_client::{
    ClientConfig, HttpTransport, McpClient, McpTransport, PredictClient, Relay, SessionManager,
    SessionTransport,
};

/// Emotion detection MCP bridge
#[derive(Debug, Parser)]
#[command(name = "emotion-bridge")]
#[command(about = "Bridge between line-delimited JSON-RPC and the emotion MCP server")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// MCP server base URL
    #[arg(long, env = "MCP_SERVER_URL", global = true)]
    server_url: Option<String>,

    /// Prediction API base URL
    #[arg(long, env = "DIRECT_API_BASE", global = true)]
    predict_url: Option<String>,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Relay JSON-RPC lines from stdin to the server, replies to stdout
    Relay {
        #[arg(long, value_enum, default_value_t = Mode::Http)]
        mode: Mode,
    },
    /// Detect the emotion of a piece of text
    Call {
        text: String,
        #[arg(long, value_enum, default_value_t = Mode::Session)]
        mode: Mode,
        /// Use the detailed tool and print its raw reply
        #[arg(long)]
        detailed: bool,
    },
    /// List the server's tools
    Tools {
        #[arg(long, value_enum, default_value_t = Mode::Session)]
        mode: Mode,
        /// Print the raw tool definitions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Wait for a session and print its id
    Session {
        /// Seconds to wait for the session (defaults to the configured wait)
        #[arg(long)]
        wait_secs: Option<u64>,
    },
    /// Call the prediction API directly, bypassing MCP
    Predict { text: String },
}

/// How requests reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Synchronous POST (`/mcp`, falling back to `/message`)
    Http,
    /// SSE session with replies on the stream
    Session,
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// File (or defaults), then environment, then flags.
fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    config.apply_env();

    if let Some(url) = &args.server_url {
        config.server_url = url.clone();
    }
    if let Some(url) = &args.predict_url {
        config.predict_url = url.clone();
    }

    Ok(config)
}

fn build_transport(mode: Mode, config: &ClientConfig) -> Result<Arc<dyn McpTransport>> {
    let transport: Arc<dyn McpTransport> = match mode {
        Mode::Http => Arc::new(HttpTransport::new(config).context("Failed to build HTTP transport")?),
        Mode::Session => Arc::new(
            SessionTransport::connect(config).context("Failed to start session transport")?,
        ),
    };
    Ok(transport)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping"),
        _ = terminate => info!("Received SIGTERM, stopping"),
    }
}

async fn run_relay(mode: Mode, config: &ClientConfig) -> Result<()> {
    let transport = build_transport(mode, config)?;
    let relay = Relay::new(transport);

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = relay.run(stdin, stdout) => {
            let stats = result.context("Relay output failed")?;
            info!(requests = stats.requests, errors = stats.errors, "Relay finished");
        }
        _ = shutdown_signal() => {}
    }
    Ok(())
}

async fn run_call(text: &str, mode: Mode, detailed: bool, config: &ClientConfig) -> Result<()> {
    let client = McpClient::new(build_transport(mode, config)?);
    if detailed {
        let raw = client
            .detect_emotion_detailed(text)
            .await
            .context("Detailed emotion detection failed")?;
        println!("{raw}");
        return Ok(());
    }

    let outcome = client
        .detect_emotion(text)
        .await
        .context("Emotion detection failed")?;
    println!("{outcome}");
    Ok(())
}

async fn run_tools(mode: Mode, json: bool, config: &ClientConfig) -> Result<()> {
    let client = McpClient::new(build_transport(mode, config)?);
    let tools = client.list_tools().await.context("Failed to list tools")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    for tool in tools {
        match tool.description {
            Some(description) => println!("{} - {}", tool.name, description),
            None => println!("{}", tool.name),
        }
    }
    Ok(())
}

async fn run_session(wait_secs: Option<u64>, config: &ClientConfig) -> Result<()> {
    // Replies are not expected; keep the receiver alive so the reader does
    // not log every payload as undeliverable.
    let (replies, _inbound) = mpsc::unbounded_channel();
    let session = SessionManager::new(config.clone(), replies)?;
    session.start();

    let wait = wait_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.session.session_wait());
    let session_id = session
        .current_session_id(wait)
        .await
        .context("No session established")?;

    println!("{session_id}");
    session.stop();
    Ok(())
}

async fn run_predict(text: &str, config: &ClientConfig) -> Result<()> {
    let client = PredictClient::new(config.predict_url.clone())?;
    let prediction = client.predict(text).await.context("Prediction failed")?;
    println!("{}", prediction.reading());
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    info!(server = %config.server_url, "Using MCP server");

    match args.command {
        Command::Relay { mode } => run_relay(mode, &config).await,
        Command::Call {
            text,
            mode,
            detailed,
        } => run_call(&text, mode, detailed, &config).await,
        Command::Tools { mode, json } => run_tools(mode, json, &config).await,
        Command::Session { wait_secs } => run_session(wait_secs, &config).await,
        Command::Predict { text } => run_predict(&text, &config).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_logs);

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
