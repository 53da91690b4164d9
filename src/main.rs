//! HAPI Risk Pipeline - Command Line Entry Point
//!
//! Loads the configured models and scores single records or batches read
//! from JSON files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hapi_risk_pipeline::{
    config::AppConfig, logging::init_logging, PredictorService, RawRecord, RawTable,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "hapi-predict",
    about = "Ensemble risk prediction for hospital-acquired pressure injury",
    version
)]
struct Cli {
    /// Configuration file (defaults to config/config.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the models that are loaded.
    Models,

    /// Score one record from a JSON object file.
    Predict {
        #[arg(long)]
        input: PathBuf,
    },

    /// Score a JSON array of records, evaluating against `actual_label` when present.
    Batch {
        #[arg(long)]
        input: PathBuf,
        /// Write the report here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the batch upload template.
    Template,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    init_logging(&config.logging)?;
    info!(
        models_dir = %config.models.models_dir.display(),
        enabled = ?config.models.enabled,
        "Starting HAPI risk pipeline"
    );

    let service = PredictorService::new(config.models);

    match cli.command {
        Commands::Models => emit(&service.available_models(), None),
        Commands::Predict { input } => {
            let record: RawRecord = read_json(&input)?;
            let result = service
                .predict_record(&record)
                .context("Prediction failed")?;
            emit(&result, None)
        }
        Commands::Batch { input, output } => {
            let table: RawTable = read_json(&input)?;
            let report = service
                .predict_table(table)
                .context("Batch prediction failed")?;
            if let Some(metrics) = &report.metrics {
                info!(metrics = ?metrics.to_map(), "Batch metrics");
            }
            emit(&report, output.as_deref())
        }
        Commands::Template => emit(&service.batch_template(), None),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}
