//! objstore CLI
//!
//! Command-line tools for objstore log files.
//!
//! # Commands
//!
//! - `inspect` - Display per key space statistics
//! - `verify` - Scan the file without modifying it
//! - `compact` - Rewrite the file with only live values
//! - `dump-keys` - List the keys of one key space
//! - `clear` - Remove every key of one key space

mod commands;

use clap::{Parser, Subcommand};
use objstore_core::KeySpace;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// objstore command-line tools.
#[derive(Parser)]
#[command(name = "objstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log file
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
    /// Display per key space statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Scan the file for torn writes and corruption
    Verify {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite the file with only live values
    Compact {
        /// Drop the cache key spaces before compacting
        #[arg(short, long)]
        clear_caches: bool,
    },

    /// List the keys of one key space in hex
    DumpKeys {
        /// Key space name (blob, blobmeta, tree, treemeta, proxy-hash, commit-to-tree)
        space: String,

        /// Maximum number of keys to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Remove every key of one key space
    Clear {
        /// Key space name
        space: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Log file path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify { format } => {
            let path = cli.path.ok_or("Log file path required for verify")?;
            commands::verify::run(&path, &format)?;
        }
        Commands::Compact { clear_caches } => {
            let path = cli.path.ok_or("Log file path required for compact")?;
            commands::compact::run(&path, clear_caches)?;
        }
        Commands::DumpKeys { space, limit } => {
            let path = cli.path.ok_or("Log file path required for dump-keys")?;
            commands::keys::dump(&path, space.parse::<KeySpace>()?, limit)?;
        }
        Commands::Clear { space } => {
            let path = cli.path.ok_or("Log file path required for clear")?;
            commands::keys::clear(&path, space.parse::<KeySpace>()?)?;
        }
        Commands::Version => {
            println!("objstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("objstore core v{}", objstore_core::VERSION);
        }
    }

    Ok(())
}
