//! Chatter Server
//!
//! Run with: cargo run -- serve
//!
//! # Configuration
//!
//! Settings come from a TOML file (`--config`, or the first of
//! `~/.config/chatter/config.toml`, `/etc/chatter/config.toml`,
//! `./config.toml`), then environment variables, then command-line flags.
//!
//! Environment variables:
//! - `CHATTER_HOST`: Host to bind to (default: 0.0.0.0)
//! - `PORT` / `CHATTER_PORT`: Port to listen on (default: 3000)
//! - `CHATTER_STATIC_DIR`: Static client directory (default: public)
//! - `CHATTER_AUTH_TIMEOUT_SECS`: Seconds allowed before `join` (default: 30)
//! - `CHATTER_HEARTBEAT_INTERVAL_SECS`: Seconds between pings (default: 30)
//! - `CHATTER_LOG_LEVEL` / `CHATTER_LOG_FORMAT`: Logging (default: info / pretty)
//! - `RUST_LOG`: Full filter directive, overrides `CHATTER_LOG_LEVEL`

use anyhow::Context;
use chatter::api::{serve, AppState};
use chatter::config::{generate_default_config, Config, LoggingConfig};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chatter")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time multi-user chat relay over WebSocket")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the chat server (default)
    Serve(ServeArgs),

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
pub struct ServeArgs {
    /// Config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve(ServeArgs::default())) {
        Commands::Serve(args) => run_server(args).await,
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("Failed to write config to {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
            Ok(())
        }
    }
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_logging(&config.logging);

    tracing::info!("Starting Chatter v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Static client directory: {}", config.server.static_dir);

    let settings = config.chat.session_settings();
    tracing::info!(
        auth_timeout = ?settings.auth_timeout,
        heartbeat_interval = ?settings.heartbeat.interval,
        heartbeat_timeout = ?settings.heartbeat.timeout,
        "Session settings"
    );

    let state = AppState::new(config.server.clone(), settings);

    if let Err(e) = serve(state).await {
        tracing::error!("Server stopped with error: {}", e);
        return Err(e.into());
    }

    tracing::info!("Chatter server stopped");
    Ok(())
}

/// Initialize tracing from the logging config; `RUST_LOG` wins when set
fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("chatter={},tower_http=info", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
