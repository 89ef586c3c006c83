//! syncfeed CLI
//!
//! Command-line tools for publishing and following change feeds.
//!
//! # Commands
//!
//! - `serve` - Publish a collection of JSON records over HTTP
//! - `follow` - Mirror a remote feed into a directory
//! - `reset-checkpoint` - Make the next follow start from the beginning
//! - `inspect` - Display change store statistics
//! - `compact` - Rewrite the change journal

mod commands;
mod rules;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// syncfeed change-feed tools.
#[derive(Parser)]
#[command(name = "syncfeed")]
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
    /// Publish a collection and serve its feed
    Serve {
        /// Change store directory
        #[arg(short, long)]
        store: PathBuf,

        /// Collection name (also the URL path segment)
        #[arg(short, long)]
        collection: String,

        /// JSON array or NDJSON file with the records to publish
        #[arg(long)]
        source: Option<PathBuf>,

        /// Field holding each record's key
        #[arg(short, long, default_value = "key")]
        key_field: String,

        /// Publish only records whose FIELD is true
        #[arg(long, value_name = "FIELD")]
        filter: Option<String>,

        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Public base URL used in record URLs
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Mirror a remote feed into a directory
    Follow {
        /// Service URL, e.g. http://host:8080/products
        #[arg(short, long)]
        url: String,

        /// Directory receiving one JSON file per record
        #[arg(short, long)]
        mirror: PathBuf,

        /// Directory holding checkpoints
        #[arg(short, long)]
        state: PathBuf,

        /// Feed timeout in seconds (0 = never, negative = return after the
        /// first change)
        #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
        timeout: i64,
    },

    /// Forget the checkpoint of a followed URL
    ResetCheckpoint {
        /// Service URL
        #[arg(short, long)]
        url: String,

        /// Directory holding checkpoints
        #[arg(short, long)]
        state: PathBuf,
    },

    /// Display change store statistics
    Inspect {
        /// Change store directory
        #[arg(short, long)]
        store: PathBuf,

        /// Only this collection
        #[arg(short, long)]
        collection: Option<String>,

        /// List changes after this sequence
        #[arg(long)]
        since: Option<u64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite the change journal to one entry per item
    Compact {
        /// Change store directory
        #[arg(short, long)]
        store: PathBuf,
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
        Commands::Serve {
            store,
            collection,
            source,
            key_field,
            filter,
            bind,
            base_url,
        } => {
            commands::serve::run(commands::serve::ServeOptions {
                store,
                collection,
                source,
                key_field,
                filter,
                bind,
                base_url,
            })?;
        }
        Commands::Follow {
            url,
            mirror,
            state,
            timeout,
        } => {
            commands::follow::run(&url, &mirror, &state, timeout)?;
        }
        Commands::ResetCheckpoint { url, state } => {
            commands::reset_checkpoint::run(&url, &state)?;
        }
        Commands::Inspect {
            store,
            collection,
            since,
            format,
        } => {
            commands::inspect::run(&store, collection.as_deref(), since, &format)?;
        }
        Commands::Compact { store } => {
            commands::compact::run(&store)?;
        }
        Commands::Version => {
            println!("syncfeed CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("syncfeed core v{}", syncfeed_core::VERSION);
        }
    }

    Ok(())
}
