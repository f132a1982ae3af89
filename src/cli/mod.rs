//! Command-line interface components
//!
//! This module contains CLI-specific code for the XNAT Sync application,
//! including argument parsing, command handlers and progress display.

pub mod args;
pub mod commands;
pub mod progress;

pub use args::{
    AuthAction, AuthArgs, Cli, Commands, GlobalArgs, RenameArgs, ShareAction, ShareArgs,
    VerifyArgs,
};
pub use commands::{handle_auth, handle_rename, handle_share, handle_verify};
pub use progress::RepairProgressBar;
