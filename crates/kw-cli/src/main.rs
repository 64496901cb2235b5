use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kw_core::ReportRequest;
use kw_report::{ReportBuilder, ReportConfig, ReportScheduler};
use kw_sources::SourcesConfig;
use kw_storage::RecordStore;
use kw_web::{AppState, WebConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kw-cli")]
#[command(about = "Knowledge worker: report builder, API server and scheduler")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API together with the report scheduler.
    Serve,
    /// Build one report from a JSON request file.
    Build { request: PathBuf },
    /// Run the scheduled report job once.
    Generate,
    /// Create the database and apply migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = ReportConfig::from_env();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config).await?,
        Commands::Build { request } => {
            let raw = tokio::fs::read(&request)
                .await
                .with_context(|| format!("reading {}", request.display()))?;
            let request: ReportRequest =
                serde_json::from_slice(&raw).context("parsing report request")?;

            let store = open_store(&config).await?;
            let built = ReportBuilder::from_config(store.clone(), &config)
                .build(&request)
                .await?;
            store.close().await;
            println!(
                "report built: filename={} url={} insights={}",
                built.filename,
                built.url,
                built.insights.len()
            );
        }
        Commands::Generate => {
            let state = AppState::connect(&config, &SourcesConfig::from_env()).await?;
            let outcome = state.scheduled.run().await?;
            state.store.close().await;
            println!(
                "report generated: file={} summary={}",
                outcome.file.display(),
                outcome.summary
            );
        }
        Commands::Migrate => {
            let store = open_store(&config).await?;
            store.close().await;
            println!("database ready: {}", config.database_url);
        }
    }

    Ok(())
}

async fn open_store(config: &ReportConfig) -> Result<RecordStore> {
    config.ensure_dirs().await?;
    RecordStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening database {}", config.database_url))
}

async fn serve(config: &ReportConfig) -> Result<()> {
    let state = AppState::connect(config, &SourcesConfig::from_env()).await?;

    let mut scheduler = ReportScheduler::new(Arc::clone(&state.scheduled), config);
    if config.scheduler_enabled {
        scheduler.start().await?;
    } else {
        info!("report scheduler disabled");
    }

    let store = state.store.clone();
    let served = kw_web::serve(state, &WebConfig::from_env()).await;

    if let Err(err) = scheduler.shutdown().await {
        let reason = format!("{err:#}");
        warn!(error = %reason, "scheduler shutdown failed");
    }
    store.close().await;
    served
}
