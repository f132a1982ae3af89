//! Reconciliation of an experiment between a source archive and a mirror
//!
//! [`Reconciler::diff`] compares scan and resource inventories and returns an
//! immutable [`DiffReport`]; [`Reconciler::repair`] uploads whatever the
//! report lists as missing. Listings are read-only: no folder is ever
//! created on either side while diffing.

pub mod diff;
pub mod repair;
pub mod report;

use std::fmt;

pub use diff::{DifferingScan, MissingScan};
pub use report::{
    DiffReport, DifferingResource, MissingResources, RepairFailure, RepairItem, RepairProgress,
    RepairSummary,
};

use crate::app::client::ArchiveClient;
use crate::app::models::{Experiment, ExperimentPath};
use crate::errors::ArchiveResult;

type RepairObserver<'a> = Box<dyn Fn(RepairProgress<'_>) + Send + Sync + 'a>;

/// Compares and repairs experiments between two archives
pub struct Reconciler<'a> {
    source: &'a ArchiveClient,
    target: &'a ArchiveClient,
    dry_run: bool,
    observer: Option<RepairObserver<'a>>,
}

impl fmt::Debug for Reconciler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("source", &self.source.server())
            .field("target", &self.target.server())
            .field("dry_run", &self.dry_run)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl<'a> Reconciler<'a> {
    pub fn new(source: &'a ArchiveClient, target: &'a ArchiveClient) -> Self {
        Self {
            source,
            target,
            dry_run: false,
            observer: None,
        }
    }

    /// Plan repairs without downloading or uploading anything
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Call `observer` after each repaired item
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(RepairProgress<'_>) + Send + Sync + 'a,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Compares `source` with its mirror copy `target`
    ///
    /// Scans are matched by series number; a source-only series is missing
    /// and a file count mismatch is a difference. Resource folders are
    /// matched by label, skipping unlabelled and empty folders on both
    /// sides; files within a folder are matched by URI and compared by
    /// digest.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError` if a folder listing can't be fetched.
    pub async fn diff(&self, source: &Experiment, target: &Experiment) -> ArchiveResult<DiffReport> {
        let source_path = ExperimentPath::from(source);
        let target_path = ExperimentPath::from(target);

        let (missing_scans, differing_scans) = diff::compare_scans(&source.scans, &target.scans);

        let mut missing_resources = Vec::new();
        let mut differing_resources = Vec::new();

        for folder in diff::reconcilable(&source.resource_folders) {
            let source_files = self
                .source
                .list_resource_files(&source_path, &folder.resource_id)
                .await?;

            let mirror_folder = diff::reconcilable(&target.resource_folders)
                .find(|candidate| candidate.label == folder.label);

            let Some(mirror_folder) = mirror_folder else {
                tracing::debug!("Folder {} is missing from {}", folder.label, target_path);
                if !source_files.is_empty() {
                    missing_resources.push(MissingResources {
                        resource_id: folder.resource_id.clone(),
                        folder_label: folder.label.clone(),
                        files: source_files,
                    });
                }
                continue;
            };

            let mirror_files = self
                .target
                .list_resource_files(&target_path, &mirror_folder.resource_id)
                .await?;
            let (missing, differing) = diff::compare_files(&source_files, &mirror_files);

            if !missing.is_empty() {
                missing_resources.push(MissingResources {
                    resource_id: folder.resource_id.clone(),
                    folder_label: folder.label.clone(),
                    files: missing,
                });
            }
            differing_resources.extend(differing.into_iter().map(|uri| DifferingResource {
                resource_id: folder.resource_id.clone(),
                folder_label: folder.label.clone(),
                uri,
            }));
        }

        let report = DiffReport::new(
            source_path,
            target_path,
            missing_scans,
            differing_scans,
            missing_resources,
            differing_resources,
        );
        tracing::info!("{}", report);
        Ok(report)
    }

    /// Fetches both experiments fresh and compares them
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::NotFound` if either experiment doesn't exist.
    pub async fn verify(&self, source: &ExperimentPath, target: &ExperimentPath) -> ArchiveResult<DiffReport> {
        let source = self.source.get_experiment(source, false).await?;
        let target = self.target.get_experiment(target, false).await?;
        self.diff(&source, &target).await
    }
}
