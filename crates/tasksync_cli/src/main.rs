//! tasksync CLI
//!
//! Operator tools for the durable outbox journal of a tasksync client.
//!
//! # Commands
//!
//! - `pending` - List every queued change
//! - `dead-letters` - List changes that need outside resolution
//! - `requeue` - Return a dead-lettered change to the queue
//! - `discard` - Drop a queued change
//! - `cursor` - Show or reset the delta-pull cursor
//! - `compact` - Rewrite the journal as a single snapshot

mod commands;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use std::path::PathBuf;
use tasksync_protocol::ChangeId;
use tracing_subscriber::EnvFilter;

/// tasksync outbox maintenance tools.
#[derive(Parser)]
#[command(name = "tasksync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the outbox journal file
    #[arg(global = true, short, long)]
    journal: Option<PathBuf>,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every queued change in delivery order
    Pending,

    /// List dead-lettered changes
    DeadLetters,

    /// Return a dead-lettered change to the queue
    Requeue {
        /// Pending change id
        id: ChangeId,
    },

    /// Drop a queued change without delivering it
    Discard {
        /// Pending change id
        id: ChangeId,
    },

    /// Show the delta-pull cursor
    Cursor {
        /// Clear the cursor so the next pull starts from scratch
        #[arg(short, long)]
        reset: bool,
    },

    /// Rewrite the journal as a single snapshot record
    Compact {
        /// Report sizes without rewriting
        #[arg(short, long)]
        dry_run: bool,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("tasksync CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = cli.journal.ok_or("journal path required (--journal)")?;
    let store = commands::open_store(&path)?;
    let format = cli.format;

    match cli.command {
        Commands::Pending => commands::outbox::list(&store, false, format)?,
        Commands::DeadLetters => commands::outbox::list(&store, true, format)?,
        Commands::Requeue { id } => commands::outbox::requeue(&store, id, format)?,
        Commands::Discard { id } => commands::outbox::discard(&store, id, format)?,
        Commands::Cursor { reset } => commands::cursor::run(&store, reset, format)?,
        Commands::Compact { dry_run } => commands::compact::run(&store, dry_run, format)?,
        Commands::Version => {}
    }

    Ok(())
}
