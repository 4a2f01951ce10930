use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod daemon;
pub mod error;
pub mod handler;
pub mod output;

/// dlkeeper - durable download queue with retry and backoff
#[derive(Parser, Debug)]
#[command(name = "dlkeeper")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Override config directory path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (TRACE level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print lifecycle events as JSON lines
    #[arg(long, global = true)]
    pub events: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download one or more URLs, retrying failures, until all are done
    Fetch {
        /// URLs to download
        #[arg(required = true)]
        urls: Vec<String>,

        /// Destination directory, or file path for a single URL
        #[arg(long, short, default_value = ".")]
        dest: PathBuf,
    },

    /// Resume downloads left over from a previous run
    Resume,

    /// List active downloads
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cancel and forget every active download
    CancelAll,

    /// Manage configuration
    Config {
        /// Configuration action
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the path of settings.toml
    Path,
}
