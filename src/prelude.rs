//! Prelude module for XNAT Sync Library
//!
//! This module re-exports the most commonly used items from the library,
//! providing a convenient way to import everything needed for typical usage
//! with a single `use xnat_sync::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use xnat_sync::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let credentials = Credentials::from_env()?;
//!     let client = ArchiveClient::connect("https://xnat.example.org", credentials, ClientConfig::default()).await?;
//!
//!     let outcome = Renamer::new(&client)
//!         .rename_subject("SPINS", "SPN01_CMH_0001_01_01", "SPN01_CMH_0002_01_01")
//!         .await?;
//!     println!("{:?}", outcome.states);
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, ArchiveError, ArchiveResult, Result};

// Essential app components that are used in most integrations
pub use crate::app::{
    ArchiveClient, ClientConfig, DiffReport, Experiment, ExperimentPath, IdMap, Md5Hash,
    Reconciler, RenameOutcome, RenameState, Renamer, RepairSummary, RequestPolicy, ResourceFile,
    ResourceFolder, ScanRecord, Subject,
};

// Identifier conversion
pub use crate::app::{resolve_pair, ArchiveIdentifier, DatmanId, KcniId};

// Authentication
pub use crate::auth::{check_credentials, get_auth_status, normalize_server_url, AuthStatus, Credentials};

// Commonly used constants
pub use crate::constants::{DEFAULT_RATE_LIMIT_RPS, ENV_PASSWORD, ENV_USERNAME, MAX_RETRIES, USER_AGENT};

pub use std::path::{Path, PathBuf};

pub use tokio;
