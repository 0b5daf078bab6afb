use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod config;
mod node;
mod replica;
mod timer;
mod transport;

use cli::{Cli, Commands};
use config::{generate_sample_config, NodeConfig};
use node::Node;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default level
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, fresh } => {
            run_node(&config, fresh).await?;
        }
        Commands::Init { output, faults } => {
            init_config(&output, faults)?;
        }
        Commands::Keygen { output } => {
            generate_keypair(output)?;
        }
        Commands::Status { endpoint } => {
            show_status(&endpoint).await?;
        }
        Commands::Submit {
            endpoint,
            transaction,
        } => {
            submit_request(&endpoint, transaction).await?;
        }
    }

    Ok(())
}

/// Run a local Palisade cluster
async fn run_node(config_path: &Path, fresh: bool) -> Result<()> {
    info!("Loading configuration from {:?}", config_path);

    if !config_path.exists() {
        error!(
            "Configuration file not found: {:?}. Run 'palisade init' to create one.",
            config_path
        );
        bail!("Configuration file not found");
    }
    let config = NodeConfig::load(config_path)?;

    let node = Node::new(config)?;
    node.run(fresh).await
}

/// Initialize a new configuration file
fn init_config(output: &Path, faults: usize) -> Result<()> {
    info!("Generating sample configuration");

    let config = generate_sample_config(faults);
    config.validate()?;
    config.save(output)?;

    info!("Configuration saved to {:?}", output);
    for (index, key) in config.validator_keypairs()?.iter().enumerate() {
        info!("  Replica {}: {}", index, key.public.to_hex());
    }

    println!("\nConfiguration file created: {}", output.display());
    println!(
        "{} validators tolerating {} faults, ledgers in {}",
        config.consensus.num_validators,
        config.consensus.f,
        config.ledger_dir.display()
    );
    println!("\nTo start the cluster, run:");
    println!("  palisade run --config {}", output.display());

    Ok(())
}

/// Generate a new keypair
fn generate_keypair(output: Option<PathBuf>) -> Result<()> {
    let keypair = palisade_core::KeyPair::generate();

    println!("Generated new keypair:");
    println!("  Public key:  {}", keypair.public.to_hex());
    println!("  Secret key:  {}", keypair.secret.to_hex());

    if let Some(path) = output {
        std::fs::write(&path, keypair.secret.to_hex())?;
        info!("Secret key saved to {:?}", path);
    }

    println!("\nAnyone holding this secret key can vote as this validator.");

    Ok(())
}

/// Show cluster status
async fn show_status(endpoint: &str) -> Result<()> {
    let url = format!("{}/status", endpoint);

    let response = reqwest::get(&url).await?;

    if response.status().is_success() {
        let status: serde_json::Value = response.json().await?;
        println!("Cluster Status:");
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        error!("Failed to get status: {}", response.status());
    }

    Ok(())
}

/// Submit a command and print the agreed ledger-state hash
async fn submit_request(endpoint: &str, transaction: String) -> Result<()> {
    let url = format!("{}/request", endpoint);

    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .json(&serde_json::json!({ "transaction": transaction }))
        .send()
        .await?;

    if response.status().is_success() {
        let result: serde_json::Value = response.json().await?;
        println!("Request committed:");
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let status = response.status();
        let error: serde_json::Value = response.json().await?;
        error!("Request failed with {}:", status);
        println!("{}", serde_json::to_string_pretty(&error)?);
    }

    Ok(())
}
