//! Command-line argument parsing for XNAT Sync
//!
//! This module defines the CLI structure using clap derive macros,
//! providing commands for verifying and repairing mirrors, renaming and
//! sharing sessions, and managing credentials.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// XNAT Sync - Keep XNAT mirrors in step with the primary archive
#[derive(Parser, Debug)]
#[command(
    name = "xnat_sync",
    version,
    about = "Verify, repair and administer imaging sessions across XNAT servers",
    long_about = "Compares scans and resource files between a primary XNAT archive and its mirror,
uploads whatever the mirror is missing, and renames or shares sessions with verification."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compare experiments between the primary archive and the mirror
    Verify(VerifyArgs),

    /// Rename sessions on the primary archive
    Rename(RenameArgs),

    /// Share subjects or experiments into another project
    Share(ShareArgs),

    /// Manage authentication credentials
    Auth(AuthArgs),
}

/// Arguments for the verify command
#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Project on the primary archive
    pub source_project: String,

    /// Project on the mirror
    pub mirror_project: String,

    /// Datman ID of a single experiment to check
    pub experiment: Option<String>,

    /// Only check sessions from this site
    #[arg(long)]
    pub site: Option<String>,

    /// Upload whatever the mirror is missing
    #[arg(long)]
    pub fix: bool,

    /// With --fix, show what would be uploaded without uploading
    #[arg(long, requires = "fix")]
    pub dry_run: bool,

    /// Write the differences found as JSON
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Arguments for the rename command
#[derive(Args, Debug, Clone)]
pub struct RenameArgs {
    /// Current session name
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    pub old: Option<String>,

    /// New session name
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    pub new: Option<String>,

    /// CSV file of `old,new` pairs, one per line
    #[arg(long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Project holding the sessions
    #[arg(short, long)]
    pub project: String,

    /// Rename only the experiment, under a subject that already has the new name
    #[arg(long, conflicts_with = "with_experiment")]
    pub experiment_only: bool,

    /// Rename the experiment too once the subject is renamed
    #[arg(long)]
    pub with_experiment: bool,

    /// With --experiment-only, the subject holding the experiment (defaults to the new name)
    #[arg(long, requires = "experiment_only")]
    pub subject: Option<String>,
}

/// Arguments for sharing
#[derive(Args, Debug)]
pub struct ShareArgs {
    #[command(subcommand)]
    pub action: ShareAction,
}

/// Sharing actions
#[derive(Subcommand, Debug, Clone)]
pub enum ShareAction {
    /// Share a subject into another project
    Subject {
        source_project: String,
        source_subject: String,
        dest_project: String,
        dest_subject: String,
    },

    /// Share an experiment into a project its subject is already shared into
    Experiment {
        source_project: String,
        subject: String,
        experiment: String,
        dest_project: String,
        dest_experiment: String,
    },
}

/// Arguments for authentication management
#[derive(Args, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub action: AuthAction,

    /// Act on the mirror instead of the primary archive
    #[arg(long, global = true)]
    pub mirror: bool,
}

/// Authentication actions
#[derive(Subcommand, Debug)]
pub enum AuthAction {
    /// Set up XNAT credentials
    Setup {
        /// Force setup even if credentials exist
        #[arg(short, long)]
        force: bool,
    },

    /// Verify current credentials
    Verify,

    /// Show authentication status
    Status,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

impl RenameArgs {
    /// The single `(old, new)` pair given on the command line
    pub fn pair(&self) -> Option<(&str, &str)> {
        match (&self.old, &self.new) {
            (Some(old), Some(new)) => Some((old.as_str(), new.as_str())),
            _ => None,
        }
    }
}
