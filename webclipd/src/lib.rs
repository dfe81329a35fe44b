mod server;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;
use tracing::info;
use webclip_core::GatewayConfig;

pub use server::Gateway;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] webclip_core::ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] webclip_core::StorageError),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Webclip capture-and-delivery gateway", long_about = None)]
pub struct Cli {
    /// Path to the gateway configuration file
    #[arg(long, default_value = "configs/webclip.toml")]
    pub config: PathBuf,
    /// Override the configured listen port
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable debug-level logging
    #[arg(long)]
    pub verbose: bool,
}

pub async fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.verbose);
    let mut config = GatewayConfig::from_file(&cli.config)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    let port = config.server.port;
    let routes = Gateway::new(config)?.routes();

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(%addr, "webclip gateway listening");
    warp::serve(routes).run(addr).await;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
