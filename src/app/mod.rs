//! Core application logic for XNAT Sync
//!
//! This module contains the archive client, the typed projections of the
//! archive's JSON and XML answers, identifier conversion and the rename and
//! reconciliation engines built on top of the client.
//!
//! # Examples
//!
//! ```rust,no_run
//! use xnat_sync::app::{ArchiveClient, ClientConfig, ExperimentPath, Reconciler};
//! use xnat_sync::auth::Credentials;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::from_env()?;
//! let source = ArchiveClient::connect(
//!     "https://xnat.example.org",
//!     credentials.clone(),
//!     ClientConfig::default(),
//! )
//! .await?;
//! let mirror = ArchiveClient::connect("https://mirror.example.org", credentials, ClientConfig::default()).await?;
//!
//! let report = Reconciler::new(&source, &mirror)
//!     .verify(
//!         &ExperimentPath::new("SPINS", "SPN01_CMH_0001_01_01", "SPN01_CMH_0001_01_01"),
//!         &ExperimentPath::new("SPN", "SPN_CAMH_0001_01", "SPN_CAMH_0001_01_SE01_MR"),
//!     )
//!     .await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod client;
pub mod hash;
pub mod identifiers;
pub mod models;
pub mod reconcile;
pub mod rename;

// Re-export main public API
pub use catalog::{parse_catalog, ResourceFile};
pub use client::{ArchiveClient, ClientConfig, RequestPolicy, Session};
pub use hash::Md5Hash;
pub use identifiers::{resolve_pair, ArchiveIdentifier, DatmanId, IdMap, KcniId};
pub use models::{Experiment, ExperimentPath, ResourceFolder, ScanRecord, Subject};
pub use reconcile::{DiffReport, Reconciler, RepairItem, RepairProgress, RepairSummary};
pub use rename::{RenameOutcome, RenameState, Renamer, SessionRename};
