//! chunkline upload server entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chunkline_server::{LoggingHook, ServerConfig, UploadServer};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chunkline-server", version, about = "Resumable upload server")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long, env = "CHUNKLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file.
    #[arg(long, env = "CHUNKLINE_BIND")]
    bind: Option<SocketAddr>,

    /// Listen port, keeps the configured host.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Upload directory, overrides the config file.
    #[arg(long, env = "CHUNKLINE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Base URL used in Location headers.
    #[arg(long, env = "CHUNKLINE_PUBLIC_URL")]
    public_url: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind,
        data_dir = %config.data_dir.display(),
        "starting chunkline server"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(port) = args.port {
        config.bind.set_port(port);
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(url) = &args.public_url {
        config.public_url = Some(url.clone());
    }
    Ok(config)
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let server = UploadServer::bind(config, Arc::new(LoggingHook)).await?;
    let token = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            token.cancel();
        }
    });
    server.run().await?;
    Ok(())
}
