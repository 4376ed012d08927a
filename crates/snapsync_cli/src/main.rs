//! snapsync CLI
//!
//! Command-line tools for replaying and inspecting snapshot feeds.
//!
//! # Commands
//!
//! - `ingest` - Ingest a JSON-lines snapshot file through the customs-entry profile
//! - `fingerprint` - Print the fingerprint of a JSON document
//! - `notes` - Parse free-text status notes

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// snapsync command-line tools.
#[derive(Parser)]
#[command(name = "snapsync")]
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
    /// Ingest snapshots, one JSON document per line
    Ingest {
        /// Snapshot file
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Worker threads
        #[arg(short, long, default_value = "1")]
        workers: usize,
    },

    /// Print the fingerprint of a JSON document
    Fingerprint {
        /// JSON file
        file: PathBuf,
    },

    /// Parse status notes
    Notes {
        /// Text file with one note per line
        file: PathBuf,

        /// Offset of zone-less timestamps, e.g. +02:00
        #[arg(short, long, default_value = "+00:00", allow_hyphen_values = true)]
        offset: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ingest {
            file,
            format,
            workers,
        } => commands::ingest::run(&file, &format, workers)?,
        Commands::Fingerprint { file } => commands::fingerprint::run(&file)?,
        Commands::Notes {
            file,
            offset,
            format,
        } => commands::notes::run(&file, &offset, &format)?,
        Commands::Version => {
            println!("snapsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("snapsync core v{}", snapsync_core::VERSION);
        }
    }

    Ok(())
}
