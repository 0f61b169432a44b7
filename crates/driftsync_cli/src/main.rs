//! DriftSync CLI
//!
//! Command-line tools for inspecting and driving the sync-down engine.
//!
//! # Commands
//!
//! - `inspect` - Display the local metadata of a replica
//! - `compare` - Print the causal relation of two vector clocks
//! - `winner` - Pick the winning branch from a set of replica histories
//! - `down` - Run one sync-down cycle against a local folder remote

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// DriftSync command-line tools.
#[derive(Parser)]
#[command(name = "driftsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the replica metadata file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the local metadata of a replica
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the causal relation of two clocks written as `A1,B2`
    Compare {
        /// Left clock
        a: String,

        /// Right clock
        b: String,
    },

    /// Pick the winning branch from a JSON map of replica histories
    Winner {
        /// JSON file mapping replica ids to header lists
        #[arg(short = 'i', long)]
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run one sync-down cycle against a local folder remote
    Down {
        /// Replica id of this machine
        #[arg(short, long)]
        client: String,

        /// Folder holding the remote objects
        #[arg(short, long)]
        remote: PathBuf,

        /// Local sync folder
        #[arg(short, long)]
        local: PathBuf,

        /// Folder for downloaded objects
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Maximum versions applied per batch
        #[arg(long)]
        batch: Option<usize>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Metadata path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Compare { a, b } => {
            commands::compare::run(&a, &b)?;
        }
        Commands::Winner { file, format } => {
            commands::winner::run(&file, &format)?;
        }
        Commands::Down {
            client,
            remote,
            local,
            cache,
            batch,
        } => {
            let path = cli.path.ok_or("Metadata path required for down")?;
            let options = commands::down::DownOptions {
                client,
                remote,
                local,
                metadata: path,
                cache,
                batch,
            };
            commands::down::run(&options)?;
        }
        Commands::Version => {
            println!("DriftSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
