//! trialmatch — Clinical trial eligibility matching.
//! Entry point for the command-line binary.

mod config;

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trialmatch_common::Bundle;
use trialmatch_matcher::coverage::{coverage_report, CoverageReport};
use trialmatch_matcher::explain::{explain, Explanation};
use trialmatch_matcher::normalise::unit_catalogue;
use trialmatch_matcher::rank::{rank_with, ranking_summary, RankedTrial, RankingSummary};
use trialmatch_matcher::{extract_features, TrialCatalog, TrialFailure, TrialMatcher};

#[derive(Parser)]
#[command(name = "trialmatch", version, about = "Match a patient record against clinical trial eligibility criteria")]
struct Cli {
    /// Config file (overrides TRIALMATCH_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate a patient against a trial catalog and print the ranked report
    Match(MatchArgs),
    /// Print the feature mapping extracted from a patient bundle
    Features {
        #[arg(long)]
        patient: PathBuf,
        /// Reference date for age calculation (default: today)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// List supported lab test types and their units
    Units,
}

#[derive(Args)]
struct MatchArgs {
    /// FHIR-shaped patient bundle (JSON)
    #[arg(long)]
    patient: PathBuf,
    /// Trial catalog (.json, .yaml or .yml)
    #[arg(long)]
    trials: PathBuf,
    /// Reference date for age calculation (default: today)
    #[arg(long)]
    as_of: Option<NaiveDate>,
    /// Include a per-trial explanation
    #[arg(long)]
    explain: bool,
    /// Include the batch coverage report
    #[arg(long)]
    coverage: bool,
    /// Keep only the first N ranked trials
    #[arg(long)]
    top: Option<usize>,
    /// Write the report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    patient_id: Option<String>,
    as_of: NaiveDate,
    summary: RankingSummary,
    results: Vec<RankedTrial>,
    failures: Vec<TrialFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    explanations: Option<Vec<Explanation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    coverage: Option<CoverageReport>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = config::Config::resolve_path(cli.config.as_deref());
    let loaded = config::Config::load(&config_path).await?;
    let config = loaded.clone().unwrap_or_default();

    // Logs go to stderr so stdout stays pure JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if loaded.is_none() {
        warn!("Config file {} not found, using defaults", config_path.display());
    }

    match cli.command {
        Command::Match(args) => run_match(args, config).await,
        Command::Features { patient, as_of } => {
            let bundle = read_bundle(&patient).await?;
            let features = extract_features(&bundle, as_of.unwrap_or_else(today));
            info!("Extracted {} features from {}", features.len(), patient.display());
            println!("{}", serde_json::to_string_pretty(&features)?);
            Ok(())
        }
        Command::Units => {
            println!("{}", serde_json::to_string_pretty(&unit_catalogue())?);
            Ok(())
        }
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

async fn run_match(args: MatchArgs, config: config::Config) -> anyhow::Result<()> {
    let bundle = read_bundle(&args.patient).await?;
    let catalog = read_catalog(&args.trials).await?;
    let as_of = args.as_of.unwrap_or_else(today);
    info!("Matching against {} trials as of {}", catalog.len(), as_of);

    let mut matcher_config = config.matcher;
    if let Some(top) = args.top {
        matcher_config.ranking.top_n = top;
    }
    let matcher = TrialMatcher::new(matcher_config)?;
    let outcome = matcher.match_patient(&bundle, as_of, &catalog.trials);

    let coverage = args.coverage.then(|| coverage_report(&outcome.results));
    let ranked = rank_with(outcome.results, &matcher.config().ranking);
    let explanations = args.explain.then(|| {
        ranked
            .iter()
            .map(|r| explain(&r.result, &matcher.config().explain))
            .collect::<Vec<_>>()
    });

    let report = MatchReport {
        patient_id: bundle.patient().and_then(|p| p.id.clone()).or(bundle.id.clone()),
        as_of,
        summary: ranking_summary(&ranked),
        results: ranked,
        failures: outcome.failures,
        explanations,
        coverage,
    };
    let json = serde_json::to_string_pretty(&report)?;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn read_bundle(path: &Path) -> anyhow::Result<Bundle> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read patient bundle {}", path.display()))?;
    Bundle::from_json(&content).with_context(|| format!("Invalid patient bundle {}", path.display()))
}

async fn read_catalog(path: &Path) -> anyhow::Result<TrialCatalog> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read trial catalog {}", path.display()))?;
    TrialCatalog::parse_for_path(path, &content)
        .with_context(|| format!("Invalid trial catalog {}", path.display()))
}
