//! XNAT Sync Library
//!
//! A Rust library for keeping imaging sessions on an XNAT mirror in step with
//! the primary archive. Provides a resilient archive client, inventory
//! reconciliation and verified renames.

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
