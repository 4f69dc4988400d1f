//! Flow-Triage: outlier triage for web-facing network flow exports.
//!
//! Loads a CSV export of network sessions, derives per-session features and
//! labels each session Normal or Suspicious with a seeded isolation forest.
//! The fitted model then classifies ad-hoc sessions typed in by an analyst.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │  Ingest  │──>│ Features │──>│  Scorer  │──>│  Report  │──>│ Export / UI  │
//! │  (csv)   │   │ (derive) │   │ (iForest)│   │          │   │ (text/ratatui)│
//! └──────────┘   └──────────┘   └──────────┘   └──────────┘   └──────────────┘
//! ```
//!
//! Everything runs synchronously on one thread. A [`session::Session`] owns
//! the output of one pass; reloading builds a new one.

mod config;
mod error;
mod export;
mod features;
mod ingest;
mod report;
mod scorer;
mod session;
mod ui;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::export::{export_prediction, export_report, OutputFormat};
use crate::report::TriageReport;
use crate::scorer::SessionQuery;
use crate::session::Session;
use crate::ui::run_ui;

/// Flow-Triage: isolation-forest triage of network flow exports.
#[derive(Parser, Debug)]
#[command(name = "flow-triage")]
#[command(author = "Security Team")]
#[command(version = "0.1.0")]
#[command(about = "Flag suspicious web sessions in a network flow CSV export")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score every session in a flow export and print the report.
    Analyze {
        /// Path to the flow CSV export.
        #[arg(short, long)]
        file: PathBuf,

        /// Path to a TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format: text, json, jsonl.
        #[arg(short, long)]
        output: Option<OutputFormat>,

        /// Rows shown in the table previews.
        #[arg(long)]
        head: Option<usize>,

        /// Expected share of outliers, in (0, 0.5].
        #[arg(long)]
        contamination: Option<f64>,

        /// Seed for the isolation forest.
        #[arg(long)]
        seed: Option<u64>,

        /// Enable verbose logging (writes to stderr).
        #[arg(short, long)]
        verbose: bool,
    },

    /// Classify a single session against a model fitted on a flow export.
    Predict {
        /// Path to the flow CSV export the model is fitted on.
        #[arg(short, long)]
        file: PathBuf,

        /// Bytes received by the server.
        #[arg(long)]
        bytes_in: u64,

        /// Bytes sent by the server.
        #[arg(long)]
        bytes_out: u64,

        /// Session duration in seconds.
        #[arg(short, long, allow_hyphen_values = true)]
        duration: f64,

        /// Path to a TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format: text, json.
        #[arg(short, long)]
        output: Option<OutputFormat>,

        /// Enable verbose logging (writes to stderr).
        #[arg(short, long)]
        verbose: bool,
    },

    /// Open the interactive dashboard.
    Dashboard {
        /// Path to the flow CSV export.
        #[arg(short, long)]
        file: PathBuf,

        /// Path to a TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default configuration file.
    GenerateConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            file,
            config,
            output,
            head,
            contamination,
            seed,
            verbose,
        } => {
            let mut config = Config::load_optional(config.as_deref())?;
            if let Some(format) = output {
                config.output.format = format;
            }
            if let Some(head) = head {
                config.report.head_rows = head;
            }
            if let Some(contamination) = contamination {
                config.scorer.contamination = contamination;
            }
            if let Some(seed) = seed {
                config.scorer.seed = seed;
            }
            config.output.verbose |= verbose;

            init_logging(config.output.verbose)?;
            config.validate()?;

            run_analyze(&file, &config)
        }

        Commands::Predict {
            file,
            bytes_in,
            bytes_out,
            duration,
            config,
            output,
            verbose,
        } => {
            let mut config = Config::load_optional(config.as_deref())?;
            if let Some(format) = output {
                config.output.format = format;
            }
            config.output.verbose |= verbose;

            init_logging(config.output.verbose)?;
            config.validate()?;

            let query = SessionQuery {
                bytes_in,
                bytes_out,
                duration_seconds: duration,
            };
            run_predict(&file, &config, &query)
        }

        Commands::Dashboard { file, config } => {
            // No subscriber: log lines would corrupt the alternate screen
            let config = Config::load_optional(config.as_deref())?;
            config.validate()?;

            let session = Session::load(&file, &config.scorer)?;
            run_ui(session, config.report.head_rows)
        }

        Commands::GenerateConfig => {
            println!("{}", Config::generate_default());
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    Ok(())
}

fn run_analyze(file: &Path, config: &Config) -> Result<()> {
    info!("Analyzing flow export: {}", file.display());

    let session = Session::load(file, &config.scorer)?;
    let report = TriageReport::build(&session, config.report.head_rows);

    println!("{}", export_report(&report, config.output.format));

    info!(
        "{} of {} scored sessions flagged suspicious",
        report.suspicious, report.scored
    );
    Ok(())
}

fn run_predict(file: &Path, config: &Config, query: &SessionQuery) -> Result<()> {
    let session = Session::load(file, &config.scorer)?;
    let outcome = session.predict(query);

    println!("{}", export_prediction(query, &outcome, config.output.format));

    if outcome.is_err() {
        std::process::exit(1);
    }
    Ok(())
}
