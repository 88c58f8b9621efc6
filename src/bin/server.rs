//! screeps-mcp server
//!
//! Serves the Screeps tools over MCP on stdin/stdout. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use screeps_mcp::config::{apply_env_overrides, load_config, load_config_from_path, validate_config, Config};
use screeps_mcp::mcp::McpServer;
use screeps_mcp::screeps::{ScreepsApi, ScreepsClient};
use screeps_mcp::tools::ToolDispatcher;
use screeps_mcp::VERSION;

#[derive(Parser)]
#[command(
    name = "screeps-mcp",
    author = "Screeps MCP Contributors",
    version = VERSION,
    about = "MCP server for the Screeps game API",
    long_about = None
)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, short, env = "SCREEPS_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Server host, e.g. screeps.com or localhost:21025
    #[arg(long)]
    host: Option<String>,

    /// Default shard
    #[arg(long)]
    shard: Option<String>,

    /// Auth token
    #[arg(long, conflicts_with_all = ["username", "password"])]
    token: Option<String>,

    /// Username, exchanged with --password for a token
    #[arg(long, requires = "password")]
    username: Option<String>,

    /// Password for --username
    #[arg(long, requires = "username")]
    password: Option<String>,

    /// Use plain HTTP/WS (private servers)
    #[arg(long)]
    insecure: bool,

    /// Maximum calls per tool per rate-limit window
    #[arg(long)]
    rate_limit: Option<usize>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        let screeps = &mut config.screeps;
        if let Some(ref host) = self.host {
            screeps.host = host.clone();
        }
        if let Some(ref shard) = self.shard {
            screeps.shard = shard.clone();
        }
        if let Some(ref token) = self.token {
            screeps.token = Some(SecretString::from(token.clone()));
            screeps.username = None;
            screeps.password = None;
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            screeps.username = Some(username.clone());
            screeps.password = Some(SecretString::from(password.clone()));
            screeps.token = None;
        }
        if self.insecure {
            screeps.secure = false;
        }
        if let Some(limit) = self.rate_limit {
            config.server.rate_limit_max_calls = limit;
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("screeps_mcp=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.with_ansi(false).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    info!("Starting screeps-mcp v{}", VERSION);

    let mut config = match cli.config {
        Some(ref path) => {
            let mut config = load_config_from_path(path)?;
            apply_env_overrides(&mut config);
            config
        }
        None => load_config()?,
    };
    cli.apply(&mut config);

    let report = validate_config(&config);
    for warning in &report.warnings {
        warn!("Config: {}", warning);
    }
    for issue in &report.errors {
        error!("Config: {}", issue);
    }
    let connection = config.connection().context("Invalid configuration")?;

    info!(
        "Target {}://{} (shard {})",
        if connection.secure { "https" } else { "http" },
        connection.host,
        connection.shard
    );

    let client = Arc::new(ScreepsClient::new(connection)?);
    let dispatcher = Arc::new(ToolDispatcher::new(
        client.clone(),
        config.server.rate_limit_max_calls,
        config.server.rate_limit_window(),
    ));
    let server = Arc::new(McpServer::new(dispatcher));

    tokio::select! {
        result = server.serve_stdio() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    client.stop_console_stream().await;
    info!("Shutdown complete");

    Ok(())
}
