// SPDX-FileCopyrightText: 2025 fedrec contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fedrec_core::config::yaml_to_json;
use fedrec_core::util::{dash_separated_ints, parse_dash_separated_ints};
use fedrec_core::{DatasetGenerator, FedConfig, Metrics, ParticipantSession};
use std::path::Path;
use tracing::info;

/// fedrec – federated scaffolding for sparse recommendation models
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a participant session (generate/fetch/train/publish per config)
    Run {
        /// Path to a YAML config file
        #[arg(short, long)]
        config: std::path::PathBuf,

        /// If set, dump the parsed config back to stdout
        #[arg(long)]
        pretty: bool,
    },
    /// Validate a config without running it
    Validate {
        /// Path to a YAML config file
        #[arg(short, long)]
        config: std::path::PathBuf,

        /// Convert YAML to JSON and print it
        #[arg(long)]
        to_json: bool,
    },
    /// Generate a synthetic Criteo dataset from config
    Generate {
        /// Path to a YAML config file
        #[arg(short, long)]
        config: std::path::PathBuf,

        /// Override per-slot cardinalities, e.g. "1000-1000-500"
        #[arg(long, value_parser = dash_separated_ints)]
        cardinalities: Option<String>,

        /// Skip generation if the data folder already holds shards
        #[arg(long)]
        skip_existing: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file early for S3 credentials
    dotenvy::dotenv().ok(); // Ignore errors if .env doesn't exist

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "fedrec={0},fedrec_core={0},fedrec_storage={0}",
            log_level
        ))
        .init();

    info!("fedrec v{} starting", env!("CARGO_PKG_VERSION"));

    match args.command {
        Commands::Run { config, pretty } => run_session(&config, pretty).await,
        Commands::Validate { config, to_json } => validate_config(&config, to_json),
        Commands::Generate {
            config,
            cardinalities,
            skip_existing,
        } => generate_dataset(&config, cardinalities, skip_existing),
    }
}

async fn run_session(config_path: &Path, pretty: bool) -> Result<()> {
    let config = FedConfig::from_yaml_file(config_path)
        .with_context(|| format!("Failed to load config {:?}", config_path))?;
    config.validate()?;

    if pretty {
        println!("{}", serde_yaml::to_string(&config)?);
    }

    let mut session = ParticipantSession::new(config);
    session.run().await?;
    session.metrics().print_summary();
    Ok(())
}

fn validate_config(config_path: &Path, to_json: bool) -> Result<()> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config {:?}", config_path))?;

    if to_json {
        println!("{}", yaml_to_json(&text)?);
    }

    let config = FedConfig::from_yaml(&text)
        .with_context(|| format!("Failed to parse config {:?}", config_path))?;
    config.validate()?;

    println!("Configuration is valid: {}", config_path.display());
    Ok(())
}

fn generate_dataset(
    config_path: &Path,
    cardinalities: Option<String>,
    skip_existing: bool,
) -> Result<()> {
    let mut config = FedConfig::from_yaml_file(config_path)
        .with_context(|| format!("Failed to load config {:?}", config_path))?;

    if let Some(cards) = cardinalities {
        let parsed = parse_dash_separated_ints(&cards).map_err(|e| anyhow::anyhow!(e))?;
        config.dataset.sparse_cardinalities = Some(parsed);
    }
    config.validate()?;

    let generator = DatasetGenerator::from_config(&config);
    if skip_existing && generator.has_existing_shards() {
        info!(
            "Data folder {} already holds shards, skipping generation",
            config.dataset.data_folder
        );
        return Ok(());
    }

    let mut metrics = Metrics::new();
    let paths = generator.generate(&mut metrics)?;
    println!(
        "Generated {} shards in {}",
        paths.len(),
        config.dataset.data_folder
    );
    Ok(())
}
