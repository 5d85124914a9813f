use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use infostream_digest::api::{self, AppState};
use infostream_digest::config;
use infostream_digest::db;
use infostream_digest::digest::{BatchRunner, Orchestrator};
use infostream_digest::scheduler::Scheduler;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override `http.bind`
    #[arg(long)]
    bind: Option<String>,

    /// Serve the API without starting the delivery scheduler
    #[arg(long)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let orchestrator = Arc::new(Orchestrator::from_config(&cfg, pool.clone())?);
    let runner: Arc<dyn BatchRunner> = orchestrator;
    let scheduler = Arc::new(Scheduler::new(runner.clone(), &cfg.scheduler)?);
    if args.no_scheduler {
        warn!("scheduler disabled; digests only run via the API");
    } else {
        scheduler.start();
    }

    let bind = args.bind.unwrap_or_else(|| cfg.http.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "serving http api");
    let app = api::router(AppState {
        pool,
        scheduler: scheduler.clone(),
        runner,
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(?err, "failed to listen for ctrl-c");
            }
            info!("shutdown requested");
        })
        .await?;

    scheduler.shutdown().await;
    Ok(())
}
