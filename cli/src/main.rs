//! `wayfarer` binary: starts the agent service or the HTTP gateway.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;

use config::AppConfig;
use wayfarer::SessionStore;

#[derive(Parser)]
#[command(name = "wayfarer", version, about = "ReAct travel agent services")]
struct Cli {
    /// Configuration file (YAML or JSON); ${VAR} values resolve from the
    /// environment.
    #[arg(long, global = true, env = "WAYFARER_CONFIG", default_value = "config/llm_config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent service (WebSocket frame streaming).
    Agent {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the HTTP gateway (SSE streaming + session/model routes).
    Gateway {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    Ok(format!("{host}:{port}").parse()?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Arc::new(AppConfig::load(&cli.config)?);
    tracing::info!(config = %cli.config, "配置已加载");

    match cli.command {
        Command::Agent { host, port } => {
            let host = host.unwrap_or_else(|| config.rpc.host.clone());
            let port = port.unwrap_or(config.rpc.port);
            let addr = parse_addr(&host, port)?;
            let sessions = Arc::new(SessionStore::new(Arc::clone(&config)));
            let state = Arc::new(serve::AppState::new(sessions));
            serve::run(addr, state).await?;
        }
        Command::Gateway { host, port } => {
            let host = host.unwrap_or_else(|| config.web.host.clone());
            let port = port.unwrap_or(config.web.port);
            let addr = parse_addr(&host, port)?;
            let state = Arc::new(gateway::AppState::new(config));
            gateway::run(addr, state).await?;
        }
    }
    Ok(())
}
