//! IndexSync CLI
//!
//! Command-line tools for inspecting and exercising the index pipeline.
//!
//! # Commands
//!
//! - `dead-letters` - List the entries of a dead-letter file
//! - `replay` - Replay a dead-letter file against an in-memory pipeline
//! - `simulate` - Run a store, queue and index workload end to end

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// IndexSync command-line tools.
#[derive(Parser)]
#[command(name = "indexsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the entries of a dead-letter file
    DeadLetters {
        /// Path to the JSON-lines dead-letter file
        #[arg(short, long)]
        file: PathBuf,

        /// Output format (text, json, cbor)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Replay a dead-letter file against an in-memory pipeline
    Replay {
        /// Path to the dead-letter file
        #[arg(short, long)]
        file: PathBuf,

        /// Input format: json (dead-letter log) or cbor (hex operations)
        #[arg(long, default_value = "json")]
        input: String,

        /// Write operations that fail again to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a store, queue and index workload end to end
    Simulate {
        /// Number of pages to create
        #[arg(short, long, default_value = "100")]
        entities: u64,

        /// Number of queue workers
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Fail every K-th index call
        #[arg(long)]
        fail_every: Option<usize>,
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
        Commands::DeadLetters { file, format } => {
            commands::dead_letters::run(&file, &format)?;
        }
        Commands::Replay {
            file,
            input,
            output,
        } => {
            let runtime = commands::runtime()?;
            runtime.block_on(commands::replay::run(&file, &input, output.as_deref()))?;
        }
        Commands::Simulate {
            entities,
            workers,
            fail_every,
        } => {
            let runtime = commands::runtime()?;
            runtime.block_on(commands::simulate::run(entities, workers, fail_every))?;
        }
        Commands::Version => {
            println!("IndexSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("IndexSync Core v{}", indexsync_core::VERSION);
        }
    }

    Ok(())
}
