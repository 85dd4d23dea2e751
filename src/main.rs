//! RadianceFleet operator runner.
//!
//! This binary is intentionally thin: it wires the library's pipeline
//! orchestrator and a couple of maintenance operations to a CLI so an
//! operator can drive a run from a terminal or a cron job. The HTTP API and
//! TUI surfaces the original system also exposes are out of scope (§1) and
//! are not built here.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use radiancefleet_core::config::Settings;
use radiancefleet_core::db::Database;
use radiancefleet_core::ingestion::{self, RawPositionRecord, RawStaticRecord};
use radiancefleet_core::orchestrator;

#[derive(Parser)]
#[command(name = "radiancefleet", about = "Maritime dark-fleet detection and risk-triage core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the full detection pipeline over [from, to) and prints the outcome.
    Run {
        /// Start of the window, RFC3339 (e.g. 2026-01-01T00:00:00Z).
        #[arg(long)]
        from: DateTime<Utc>,
        /// End of the window, RFC3339.
        #[arg(long)]
        to: DateTime<Utc>,
        /// Reproducibility parameter for age-based scoring; defaults to `to`.
        #[arg(long)]
        scoring_date: Option<DateTime<Utc>>,
    },
    /// Ingests a batch of position and/or static-data records from a JSON file.
    Ingest {
        /// Path to a JSON file containing `{"positions": [...], "static_data": [...]}`.
        #[arg(long)]
        file: PathBuf,
    },
    /// Purges short-retention AIS observation rows older than 72h.
    PurgeObservations,
}

#[derive(Deserialize, Default)]
struct IngestFile {
    #[serde(default)]
    positions: Vec<RawPositionRecord>,
    #[serde(default)]
    static_data: Vec<RawStaticRecord>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("loading settings")?;
    let db = Database::open(std::path::Path::new(&settings.database_path))
        .context("opening database")?;

    match cli.command {
        Command::Run { from, to, scoring_date } => {
            let scoring_date = scoring_date.unwrap_or(to);
            let outcome = orchestrator::run(&db, &settings, from, to, scoring_date)
                .await
                .context("pipeline run")?;
            info!(
                pipeline_run_id = outcome.pipeline_run_id,
                status = ?outcome.run_status,
                "pipeline run finished"
            );
            for (step, result) in &outcome.steps {
                info!(step, status = ?result.status, detail = %result.detail, "step result");
            }
            if !outcome.drift_disabled_detectors.is_empty() {
                info!(detectors = ?outcome.drift_disabled_detectors, "detectors suppressed due to drift");
            }
        }
        Command::Ingest { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let batch: IngestFile = serde_json::from_str(&raw).context("parsing ingest file")?;
            let stats = ingestion::batch::ingest_batch(&db, &batch.positions, &batch.static_data)
                .context("ingesting batch")?;
            info!(
                stored = stats.stored,
                vessels_updated = stats.vessels_updated,
                duplicates_skipped = stats.duplicates_skipped,
                errors = stats.errors,
                "batch ingest complete"
            );
        }
        Command::PurgeObservations => {
            let cutoff = Utc::now() - chrono::Duration::hours(72);
            let n = db.purge_observations_before(cutoff).context("purging observations")?;
            info!(purged = n, cutoff = %cutoff, "observation purge complete (uncommitted — caller transaction)");
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "radiancefleet_core=info,radiancefleet=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
