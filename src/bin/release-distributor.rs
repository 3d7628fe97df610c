//! Release Distributor CLI
//!
//! Loads a distribution config and a release document, then publishes the
//! release to every enabled channel.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use release_distributor::{DistributionConfig, DistributionCoordinator, Release};
use std::path::{Path, PathBuf};
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Publish one release to many distribution channels
#[derive(Parser)]
#[command(name = "release-distributor")]
#[command(version)]
#[command(about = "Publish one release to many distribution channels", long_about = None)]
struct Cli {
    /// Emit newline-delimited JSON log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and publish a release
    Distribute {
        /// Distribution config (YAML or JSON)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Release descriptor (JSON)
        #[arg(short, long, value_name = "FILE")]
        release: PathBuf,
    },

    /// Run pre-flight validators only
    Validate {
        /// Distribution config (YAML or JSON)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Release descriptor (JSON)
        #[arg(short, long, value_name = "FILE")]
        release: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match run(cli.command).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

async fn run(command: Commands) -> Result<i32> {
    match command {
        Commands::Distribute { config, release } => distribute_command(&config, &release).await,
        Commands::Validate { config, release } => validate_command(&config, &release).await,
    }
}

async fn load(config: &Path, release: &Path) -> Result<(DistributionCoordinator, Release)> {
    let config = DistributionConfig::load(config)
        .await
        .with_context(|| format!("loading {}", config.display()))?;

    let content = tokio::fs::read_to_string(release)
        .await
        .with_context(|| format!("reading {}", release.display()))?;
    let release = Release::from_json(&content)
        .with_context(|| format!("parsing {}", release.display()))?;

    let coordinator = DistributionCoordinator::from_config(config).await?;
    Ok((coordinator, release))
}

async fn distribute_command(config: &Path, release: &Path) -> Result<i32> {
    let (coordinator, release) = load(config, release).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    let outcome = coordinator.distribute(&cancel, &release).await;

    let status = coordinator.publisher_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    match outcome {
        Ok(()) => {
            info!(tag = %release.tag, "release distributed");
            Ok(0)
        }
        Err(e) => {
            eprintln!("distribution failed: {}", e);
            Ok(if e.is_cancelled() { 130 } else { 1 })
        }
    }
}

async fn validate_command(config: &Path, release: &Path) -> Result<i32> {
    let (coordinator, release) = load(config, release).await?;

    let results = coordinator.validate_release(&release).await?;
    let valid = results.iter().all(|(_, result)| result.errors.is_empty());

    let report: serde_json::Map<String, serde_json::Value> = results
        .into_iter()
        .map(|(name, result)| Ok((name, serde_json::to_value(result)?)))
        .collect::<Result<_>>()?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if valid { 0 } else { 1 })
}
