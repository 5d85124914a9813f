use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use infostream_digest::config;
use infostream_digest::db;
use infostream_digest::digest::Orchestrator;
use infostream_digest::model::{is_valid_delivery_time, BatchStatus};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one digest batch, print its summary as JSON and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Deliver subscriptions due at this HH:MM slot
    #[arg(long, conflicts_with_all = ["immediate", "all"])]
    time: Option<String>,

    /// Deliver pending immediate requests and clear their flags
    #[arg(long)]
    immediate: bool,

    /// Deliver every subscription regardless of its slot
    #[arg(long, conflicts_with = "immediate")]
    all: bool,

    /// Exit non-zero unless the batch status is success
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Some(time) = args.time.as_deref() {
        if !is_valid_delivery_time(time) {
            bail!("--time must be HH:MM, got {time:?}");
        }
    } else if !args.immediate && !args.all {
        bail!("pass one of --time HH:MM, --immediate or --all");
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let orchestrator = Orchestrator::from_config(&cfg, pool)?;

    let summary = if args.immediate {
        info!("running immediate batch");
        orchestrator.run_immediate().await
    } else {
        info!(time = ?args.time, "running scheduled batch");
        orchestrator.run_scheduled(args.time.as_deref()).await
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if args.strict && summary.status != BatchStatus::Success {
        bail!("batch finished with status {}", summary.status.as_str());
    }
    Ok(())
}
