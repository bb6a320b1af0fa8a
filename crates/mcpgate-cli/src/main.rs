//! mcpgate binary: load config, install tracing, run the gateway

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcpgate_server::{GatewayConfig, GatewayServer};

#[derive(Debug, Parser)]
#[command(name = "mcpgate", about = "Multi-tenant MCP gateway", version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "MCPGATE_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Override the configured bind address
    #[arg(short, long, env = "MCPGATE_BIND")]
    bind: Option<String>,

    /// Log filter (tracing EnvFilter syntax)
    #[arg(long, env = "MCPGATE_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log).context("invalid log filter")?)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            GatewayConfig::from_toml(&text).context("parsing configuration")?
        }
        None => GatewayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    info!(bind_addr = %config.bind_addr, backends = config.backends.len(), "starting mcpgate");
    let server = GatewayServer::builder(config)
        .build()
        .context("building gateway")?;
    server.run().await.context("running gateway")?;
    Ok(())
}
