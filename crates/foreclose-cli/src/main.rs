use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use foreclose_core::{ChangeDetector, SettingsNamespace};
use foreclose_storage::{open_store, SettingsService};
use foreclose_sync::{build_pipeline_from_env, load_preset_catalogs, SyncConfig};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "foreclose-cli")]
#[command(about = "NJ sheriff-sale foreclosure tracker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one scrape pass, or keep running on the cron schedule with --schedule.
    Sync {
        #[arg(long)]
        schedule: bool,
    },
    Migrate,
    Serve,
    /// Print the effective settings for a namespace.
    Resolve {
        namespace: String,
        #[arg(long)]
        county: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        preset: Option<String>,
    },
    /// Classify a listing JSON file against an optional prior fingerprint.
    Fingerprint {
        file: PathBuf,
        #[arg(long)]
        prior: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync { schedule: false }) {
        Commands::Sync { schedule } => {
            let pipeline = build_pipeline_from_env().await?;
            if schedule {
                let Some(scheduler) = pipeline.maybe_build_scheduler().await? else {
                    bail!("--schedule requires FORECLOSE_SCHEDULER_ENABLED=1");
                };
                scheduler.start().await.context("starting scheduler")?;
                info!("scheduler running; ctrl-c to stop");
                tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                return Ok(());
            }
            let summary = pipeline.run_once().await?;
            println!(
                "sync complete: run_id={} new={} changed={} unchanged={} skipped={} reports={}",
                summary.run_id,
                summary.new_listings,
                summary.changed_listings,
                summary.unchanged_listings,
                summary.skipped_without_id,
                summary.reports_dir
            );
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let Some(url) = config.database_url.as_deref() else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            foreclose_storage::migrate(url, &config.workspace_root).await?;
            println!("migrations applied");
        }
        Commands::Serve => {
            foreclose_web::serve_from_env().await?;
        }
        Commands::Resolve {
            namespace,
            county,
            user,
            preset,
        } => {
            let namespace: SettingsNamespace = namespace.parse()?;
            let config = SyncConfig::from_env();
            let store = open_store(config.database_url.as_deref()).await?;
            let presets = load_preset_catalogs(&config.workspace_root).await?;
            let resolved = SettingsService::new(store, Arc::new(presets))
                .resolve_namespace(
                    namespace,
                    county.as_deref(),
                    user.as_deref(),
                    preset.as_deref(),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
        Commands::Fingerprint { file, prior } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let fields: Map<String, Value> = serde_json::from_str(&text)
                .with_context(|| format!("parsing {} as a JSON object", file.display()))?;
            let classification = ChangeDetector::new().classify(&fields, prior.as_deref());
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
    }

    Ok(())
}
