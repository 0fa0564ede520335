//! Skylark replay binary.
//!
//! Loads a coordinator configuration, replays JSON-lines raw events from a
//! file or stdin, waits for the last resolution windows to close, and
//! prints the coordinator counters as JSON.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skylark_core::{CoordinatorBuilder, CoreConfig, CoreError, IngressError, RawEvent};

#[derive(Parser, Debug, Clone)]
#[command(name = "skylark")]
#[command(about = "Replay community activity through the engagement coordination core")]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "SKYLARK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (overrides `general.log_level`)
    #[arg(long, env = "SKYLARK_LOG")]
    log_level: Option<String>,

    /// JSON-lines event file (stdin when omitted)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Extra wait after the input ends, in milliseconds
    #[arg(long, default_value = "0")]
    linger_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CoreConfig::from_file(path)?,
        None => CoreConfig::new("skylark"),
    };
    let level = args.log_level.clone().unwrap_or_else(|| config.general.log_level.clone());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("skylark={},skylark_core={},info", level, level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let coordinator = CoordinatorBuilder::from_config(config)
        .build()
        .context("building coordinator")?;
    coordinator.start().await?;

    let replayed = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            replay(&coordinator, file).await?
        }
        None => replay(&coordinator, tokio::io::stdin()).await?,
    };
    info!(accepted = replayed.0, rejected = replayed.1, "Replay finished");

    if args.linger_ms > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(args.linger_ms)).await;
    }
    coordinator.shutdown().await;

    let stats = coordinator.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Feed every line to the coordinator. Returns (accepted, rejected).
async fn replay<R: AsyncRead + Unpin>(
    coordinator: &skylark_core::EngagementCoordinator,
    input: R,
) -> anyhow::Result<(u64, u64)> {
    let mut lines = BufReader::new(input).lines();
    let (mut accepted, mut rejected) = (0, 0);
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawEvent = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping unparsable record");
                rejected += 1;
                continue;
            }
        };
        match coordinator.ingest(raw).await {
            Ok(_) => accepted += 1,
            Err(CoreError::Ingress(e @ (IngressError::Validation(_) | IngressError::Duplicate { .. }))) => {
                warn!(line = line_no, error = %e, "Record rejected");
                rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok((accepted, rejected))
}
