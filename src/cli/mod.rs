//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "loglens",
    version,
    about = "Log field extraction, anonymization and template mining",
    long_about = "loglens reads heterogeneous log files, extracts structured fields, produces an \
                  original and an anonymized view of every record, and incrementally discovers \
                  message templates on both views."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/loglens/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process log files and write one JSON record per line
    Process {
        /// Input log files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output file (defaults to stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// State file to continue from (defaults to storage.state_file)
        #[arg(long, value_name = "FILE")]
        state: Option<PathBuf>,

        /// Save the clustering state after processing
        #[arg(long)]
        save_state: bool,

        /// Redaction mode override (classic, semantic, hybrid)
        #[arg(short, long)]
        mode: Option<String>,

        /// Extract and redact on all cores
        #[arg(long)]
        parallel: bool,

        /// Profile to apply
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// List the templates stored in a state file
    Templates {
        /// State file (defaults to storage.state_file)
        #[arg(long, value_name = "FILE")]
        state: Option<PathBuf>,

        /// Channel to list (original, anonymized); both when omitted
        #[arg(long)]
        channel: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Print the default configuration path
    Path,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
