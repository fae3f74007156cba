//! Drift and coverage audit.
//!
//! Compares the catalog with generated artifacts and prints the findings as
//! JSON. Stale artifacts are deleted only with `--apply`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use wastemap::catalog::store::to_pretty_json;
use wastemap::catalog::{CatalogLayout, CatalogLock, CatalogMerger};
use wastemap::config::Config;
use wastemap::drift::{DriftAuditor, DEFAULT_SAMPLE};
use wastemap::error::FatalError;
use wastemap::sources::read_seed_list;

#[derive(Parser, Debug)]
#[command(name = "audit")]
#[command(about = "Report drift between the catalog and generated artifacts")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "wastemap.toml")]
    config: PathBuf,

    /// Only report (and prune) this place group
    #[arg(long)]
    group: Option<String>,

    /// Delete stale artifacts and orphaned facilities
    #[arg(long)]
    apply: bool,

    /// Entries listed per finding
    #[arg(long, default_value_t = DEFAULT_SAMPLE)]
    sample: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::load_from_file(&args.config)
        .map_err(|e| FatalError::InvalidConfig(format!("{:#}", e)))?;
    let layout = CatalogLayout::new(&config.global.data_dir);
    if !layout.data_dir.is_dir() {
        return Err(FatalError::MissingDataDir(layout.data_dir.clone()).into());
    }

    let seeds_file = layout.seeds_file();
    let listed = if seeds_file.exists() {
        read_seed_list(&seeds_file)?
    } else {
        warn!("No seed list at {}", seeds_file.display());
        Vec::new()
    };

    let auditor = DriftAuditor::new(
        layout.clone(),
        config.global.generated_dir.clone(),
        args.sample,
    );
    let report = match &args.group {
        Some(group) => auditor.audit_group(&listed, group)?,
        None => auditor.audit(&listed)?,
    };
    print!("{}", to_pretty_json(&report)?);

    if report.is_clean() {
        info!("No drift found");
        return Ok(());
    }

    let _lock = args
        .apply
        .then(|| CatalogLock::acquire(&layout))
        .transpose()?;
    let outcome = auditor.prune(&report, args.apply)?;
    if outcome.applied && outcome.catalog_facilities > 0 {
        CatalogMerger::new(layout).rebuild(config.global.neighbors_k)?;
    }
    Ok(())
}
