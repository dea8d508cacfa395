//! CLI argument parsing using clap 4.x derive macros

pub mod render;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use loanflow_core::conversation::LoanPurpose;
use loanflow_core::responder::extract;
use loanflow_core::router::RoutingStrategy;

/// Conversation engine for multi-stage loan origination
///
/// Guides an applicant from greeting through requirements capture, identity
/// verification and underwriting to a decision, against a synthetic bureau.
#[derive(Parser, Debug)]
#[command(name = "loanflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// The command to execute (defaults to `chat`)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print version information
    #[arg(long)]
    pub version: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive loan conversation
    Chat {
        /// Conversation id to start or resume
        #[arg(short, long)]
        id: Option<String>,

        /// Routing strategy (score_based, load_based, capability_based, hybrid)
        #[arg(short, long)]
        strategy: Option<RoutingStrategy>,
    },

    /// Replay a script of messages, one per line
    Run {
        /// Script file; blank lines and lines starting with '#' are skipped
        script: PathBuf,

        /// Conversation id
        #[arg(short, long)]
        id: Option<String>,

        /// Print each reply as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Compute the monthly installment for a loan
    Emi {
        /// Principal in rupees
        #[arg(short, long)]
        amount: f64,

        /// Annual interest rate in percent
        #[arg(short, long)]
        rate: f64,

        /// Tenure in months
        #[arg(short, long)]
        tenure: u32,
    },

    /// Run underwriting for a single application
    Decide {
        /// Requested amount in rupees
        #[arg(short, long)]
        amount: f64,

        /// Tenure in months
        #[arg(short, long)]
        tenure: u32,

        /// Purpose, by name or menu number
        #[arg(short, long, value_parser = parse_purpose, default_value = "personal")]
        purpose: LoanPurpose,

        /// Credit score
        #[arg(short, long)]
        score: u32,

        /// Pre-approved limit in rupees
        #[arg(short, long)]
        limit: f64,

        /// Monthly income, reviewed when the amount needs income proof
        #[arg(short, long)]
        income: Option<f64>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,

    /// Print the configuration file location
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Accepts "education", "home_improvement", "Home Improvement", "3" or any
/// phrase the conversation extractor recognizes
pub fn parse_purpose(value: &str) -> Result<LoanPurpose, String> {
    let trimmed = value.trim();
    if let Some(purpose) = trimmed.parse::<u8>().ok().and_then(LoanPurpose::from_menu) {
        return Ok(purpose);
    }
    let normalized = trimmed.to_ascii_lowercase().replace(['_', '-'], " ");
    LoanPurpose::ALL
        .into_iter()
        .find(|p| p.label().to_ascii_lowercase() == normalized)
        .or_else(|| extract::extract_purpose(&normalized))
        .ok_or_else(|| {
            format!(
                "unknown purpose '{}' (expected one of: {})",
                value,
                LoanPurpose::menu().join(", ")
            )
        })
}
