use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Palisade - Byzantine fault tolerant replicated log
#[derive(Parser)]
#[command(name = "palisade")]
#[command(about = "Palisade cluster node and utilities")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a local cluster of replicas behind the RPC server
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Delete existing ledger files before starting
        #[arg(long)]
        fresh: bool,
    },

    /// Initialize a new cluster configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,

        /// Number of Byzantine replicas to tolerate; 3f+1 validators are generated
        #[arg(short, long, default_value_t = 1)]
        faults: usize,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show cluster status
    Status {
        /// RPC endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        endpoint: String,
    },

    /// Submit a command and wait for it to commit
    Submit {
        /// RPC endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        endpoint: String,

        /// The command, a single line of text
        transaction: String,
    },
}
