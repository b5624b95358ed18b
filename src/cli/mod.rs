//! CLI interface using clap
//!
//! Provides the command-line interface for Sigmaward

mod commands;

pub use commands::*;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sigmaward - Sigma rule lifecycle for ElastAlert
#[derive(Parser, Debug)]
#[command(name = "sigmaward")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Working root for relative paths (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    pub path: PathBuf,

    /// Configuration file (defaults to <path>/.sigmaward/config.toml)
    #[arg(short, long, global = true, env = "SIGMAWARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the database and configuration
    Init(InitArgs),

    /// Add a new rule from a Sigma document
    Add(AddArgs),

    /// Store a new version of an existing rule
    Update(UpdateArgs),

    /// List rules
    List,

    /// Show a rule with all of its versions
    Show(RuleArgs),

    /// Compile a rule and mark it active
    Enable(RuleArgs),

    /// Mark a rule inactive and remove its artifact
    Disable(RuleArgs),

    /// Delete a rule with its versions and alerts
    Delete(RuleArgs),

    /// Import every rule file under a directory
    Load(LoadArgs),

    /// Write the latest version of every rule to a directory
    Export(ExportArgs),

    /// Delete all rules and artifacts
    Clear(ForceArgs),

    /// Delete all compiled artifacts
    ClearArtifacts(ForceArgs),

    /// Rebuild the artifact directory from the active rules
    Sync,

    /// Reconcile fired alerts from Elasticsearch
    SyncAlerts(SinceArgs),

    /// List the alerts recorded for a rule, newest first
    Alerts(AlertsArgs),

    /// Show alert counts per rule
    AlertStats(SinceArgs),

    /// Show database and artifact status
    Status,

    /// Show configuration
    Config(ConfigArgs),
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Arguments for init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Force re-initialization
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for add command
#[derive(Parser, Debug)]
pub struct AddArgs {
    /// Rule file, or `-` for stdin
    pub file: PathBuf,

    /// Compile and activate after adding
    #[arg(short, long)]
    pub enable: bool,
}

/// Arguments for update command
#[derive(Parser, Debug)]
pub struct UpdateArgs {
    /// Rule id, title or slug
    pub rule: String,

    /// Rule file, or `-` for stdin
    pub file: PathBuf,
}

/// A single rule reference
#[derive(Parser, Debug)]
pub struct RuleArgs {
    /// Rule id, title or slug
    pub rule: String,
}

/// Arguments for load command
#[derive(Parser, Debug)]
pub struct LoadArgs {
    /// Directory to import (defaults to the configured rules_dir)
    pub dir: Option<PathBuf>,

    /// Activate every imported rule
    #[arg(long)]
    pub auto_enable: bool,
}

/// Arguments for export command
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Existing, empty target directory
    pub dir: PathBuf,
}

/// Confirmation for destructive commands
#[derive(Parser, Debug)]
pub struct ForceArgs {
    /// Confirm the deletion
    #[arg(short, long)]
    pub force: bool,
}

/// Time window arguments
#[derive(Parser, Debug)]
pub struct SinceArgs {
    /// Start of the window: RFC 3339 or relative ("90m", "1h", "2d", "-1 hour")
    #[arg(short, long, allow_hyphen_values = true)]
    pub since: Option<String>,
}

/// Arguments for alerts command
#[derive(Parser, Debug)]
pub struct AlertsArgs {
    /// Rule id, title or slug
    pub rule: String,

    /// Only alerts recorded since this time
    #[arg(short, long, allow_hyphen_values = true)]
    pub since: Option<String>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Reset to defaults
    #[arg(long)]
    pub reset: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
