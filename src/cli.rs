//! Command-line definitions using the clap derive API.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::config_persistence::DEFAULT_CONFIG_FILE_NAME;

/// Finds and downloads one representative image per product filename.
#[derive(Parser, Debug)]
#[command(
    name = "imagescout",
    version,
    about = "Acquire product images by scraping public image search",
    after_help = "EXAMPLES:\n  \
                  Run the configured batch:\n    imagescout\n\n\
                  Use a different folder and more workers:\n    imagescout --output shots --workers 5\n\n\
                  Fetch stock photos for the first items:\n    imagescout simple --limit 5\n\n\
                  Write the default configuration:\n    imagescout write-config"
)]
pub struct Cli {
    /// Configuration file (defaults to ./imagescout.toml when present)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Destination folder for downloaded images
    #[arg(long, short = 'o', global = true)]
    pub output: Option<String>,

    /// Maximum number of items processed concurrently
    #[arg(long, short = 'w', global = true)]
    pub workers: Option<usize>,

    /// Per-item time budget in seconds
    #[arg(long, global = true)]
    pub item_timeout: Option<u64>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Search, download, and fall back for every configured item (default)
    Run,

    /// Download generic stock photos by keyword, without searching
    Simple {
        /// Number of items to fetch, from the start of the list
        #[arg(long, default_value_t = 3)]
        limit: usize,
    },

    /// Write the default configuration as TOML
    WriteConfig {
        /// Target file
        #[arg(default_value = DEFAULT_CONFIG_FILE_NAME)]
        path: PathBuf,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Applies command-line flags on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(output) = &self.output {
            config.output.folder = output.clone();
        }
        if let Some(workers) = self.workers {
            config.orchestrator.max_workers = workers;
        }
        if let Some(item_timeout) = self.item_timeout {
            config.orchestrator.per_item_timeout_secs = item_timeout;
        }
    }
}
