//! `chunkline` command-line upload client.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chunkline_client::{
    ClientConfig, HttpTransport, UploadTransport, UploadWorker, generate_session_id,
};
use chunkline_protocol::constants::UPLOADS_INFO_PATH;
use chunkline_protocol::{Command, Event, Metadata, StartPayload};
use clap::{Parser, Subcommand};
use reqwest::Url;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chunkline", version, about = "Resumable file upload client")]
struct Args {
    /// TOML client configuration file.
    #[arg(short, long, env = "CHUNKLINE_CLIENT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Upload collection URL, overrides the config file.
    #[arg(long, env = "CHUNKLINE_ENDPOINT", global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Upload a file, or resume an earlier upload of it.
    Upload {
        file: PathBuf,

        /// Upload URL printed by an interrupted run.
        #[arg(long)]
        resume: Option<String>,

        /// Extra metadata as key=value.
        #[arg(long = "meta", value_parser = parse_key_val)]
        metadata: Vec<(String, String)>,

        /// Bytes per request, overrides the config file.
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Show the server's offset for an upload.
    Status { upload_url: String },
    /// Delete an upload on the server.
    Cancel { upload_url: String },
    /// List uploads persisted on the server.
    List,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err("metadata key must not be empty".into());
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args.command, config))
}

async fn run(command: Cmd, mut config: ClientConfig) -> anyhow::Result<()> {
    let transport = HttpTransport::new(config.request_timeout())?;
    match command {
        Cmd::Upload {
            file,
            resume,
            metadata,
            chunk_size,
        } => {
            if let Some(size) = chunk_size {
                config.chunk_size = size;
            }
            let metadata: Metadata = metadata.into_iter().collect();
            upload(transport, config, file, resume, metadata).await
        }
        Cmd::Status { upload_url } => {
            let state = transport.query_offset(&upload_url).await?;
            match state.length {
                Some(length) => println!("offset {} of {length}", state.offset),
                None => println!("offset {} (length deferred)", state.offset),
            }
            if let Some(location) = state.location {
                println!("complete: {location}");
            }
            Ok(())
        }
        Cmd::Cancel { upload_url } => {
            transport.terminate(&upload_url).await?;
            println!("cancelled {upload_url}");
            Ok(())
        }
        Cmd::List => {
            let info_url = Url::parse(&config.endpoint)
                .and_then(|url| url.join(UPLOADS_INFO_PATH))
                .with_context(|| format!("invalid endpoint {}", config.endpoint))?;
            for upload in transport.list_uploads(info_url.as_str()).await? {
                let size = upload
                    .size
                    .map_or_else(|| "?".to_string(), |s| s.to_string());
                let state = if upload.complete { "complete" } else { "partial" };
                println!(
                    "{}\t{}/{}\t{state}\t{}",
                    upload.id,
                    upload.offset,
                    size,
                    upload.filename.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
    }
}

async fn upload(
    transport: HttpTransport,
    config: ClientConfig,
    path: PathBuf,
    resume: Option<String>,
    metadata: Metadata,
) -> anyhow::Result<()> {
    let mut handle = UploadWorker::new(Arc::new(transport), config).start();
    let mut events = handle
        .take_events()
        .context("event receiver already taken")?;
    let session_id = generate_session_id();

    handle
        .send(Command::Start {
            session_id: session_id.clone(),
            payload: StartPayload {
                path,
                endpoint: None,
                upload_url: resume,
                metadata,
            },
        })
        .await?;

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Event::Progress { payload, .. }) => {
                    info!(
                        uploaded = payload.uploaded_bytes,
                        total = payload.total_bytes,
                        percent = payload.percentage,
                        speed_bps = payload.speed as u64,
                        remaining_secs = payload.remaining_time,
                        "progress"
                    );
                }
                Some(Event::Complete { payload, .. }) => {
                    println!("{}", payload.location);
                    break Ok(());
                }
                Some(Event::Paused { payload, .. }) => {
                    if let Some(url) = payload.upload_url {
                        println!("paused at {} bytes, resume with --resume {url}", payload.uploaded_bytes);
                    }
                    break Ok(());
                }
                Some(Event::Error { payload, .. }) => {
                    if let Some(url) = payload.upload_url {
                        eprintln!("resume with --resume {url}");
                    }
                    break Err(anyhow!(payload.message));
                }
                Some(Event::Cancelled { .. }) => break Ok(()),
                Some(Event::Resumed { .. }) => {}
                None => break Err(anyhow!("upload worker stopped")),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, pausing upload");
                handle.send(Command::Pause { session_id: session_id.clone() }).await?;
            }
        }
    };

    handle.stop().await;
    outcome
}
