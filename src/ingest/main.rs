//! Catalog rebuild.
//!
//! Reads every configured source for one or all place groups, resolves
//! facility identities and places, and rewrites the on-disk catalog.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};

use wastemap::config::{Config, SourceMode};
use wastemap::error::FatalError;
use wastemap::geocode::MapServices;
use wastemap::pipeline::{Pipeline, RunOptions};

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Rebuild the waste-facility catalog from its sources")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "wastemap.toml")]
    config: PathBuf,

    /// Only process this place group
    #[arg(long)]
    group: Option<String>,

    /// Override the configured source mode
    #[arg(long, value_enum)]
    mode: Option<SourceMode>,

    /// Make no network calls; cached reverse-geocode answers are still used
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!("wastemap ingest");
    info!("Config: {}", args.config.display());

    let config = Config::load_from_file(&args.config)
        .map_err(|e| FatalError::InvalidConfig(format!("{:#}", e)))?;
    let options = RunOptions {
        group: args.group.clone(),
        mode: args.mode.unwrap_or(config.global.mode),
    };
    info!("Source mode: {:?}", options.mode);

    let services = if args.offline {
        info!("Offline run; no network calls");
        None
    } else {
        Some(MapServices::new(
            &config.global.nominatim_url,
            &config.global.overpass_url,
            &config.global.user_agent,
            config.global.retry_policy(),
        )?)
    };

    let started = Utc::now();
    let mut pipeline = Pipeline::new(config, services)?;
    let summary = pipeline.run(&options).await?;

    info!(
        "Catalog: {} facilities ({} new, {} updated, {} unchanged), {} places",
        summary.facilities,
        summary.merge.created,
        summary.merge.updated,
        summary.merge.unchanged,
        summary.places
    );
    if !summary.report.collisions.is_empty() {
        error!(
            "{} facility ID collisions; see {}",
            summary.report.collisions.len(),
            pipeline.layout().quality_report_file().display()
        );
    }
    let elapsed = Utc::now() - started;
    info!("Finished in {}s", elapsed.num_seconds());
    Ok(())
}
