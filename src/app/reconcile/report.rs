//! Diff and repair reports
//!
//! A [`DiffReport`] is built once and never mutated; re-running the diff
//! produces a new one.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::diff::{DifferingScan, MissingScan};
use crate::app::catalog::ResourceFile;
use crate::app::models::ExperimentPath;

/// Resource files missing from one target folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingResources {
    /// Resource group ID on the source
    pub resource_id: String,
    pub folder_label: String,
    pub files: Vec<ResourceFile>,
}

/// A resource file whose digest differs between source and target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DifferingResource {
    pub resource_id: String,
    pub folder_label: String,
    pub uri: String,
}

/// Differences between a source experiment and its mirror copy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffReport {
    source: ExperimentPath,
    target: ExperimentPath,
    missing_scans: Vec<MissingScan>,
    differing_scans: Vec<DifferingScan>,
    missing_resources: Vec<MissingResources>,
    differing_resources: Vec<DifferingResource>,
    generated_at: DateTime<Utc>,
}

impl DiffReport {
    pub(crate) fn new(
        source: ExperimentPath,
        target: ExperimentPath,
        missing_scans: Vec<MissingScan>,
        differing_scans: Vec<DifferingScan>,
        missing_resources: Vec<MissingResources>,
        differing_resources: Vec<DifferingResource>,
    ) -> Self {
        Self {
            source,
            target,
            missing_scans,
            differing_scans,
            missing_resources,
            differing_resources,
            generated_at: Utc::now(),
        }
    }

    pub fn source(&self) -> &ExperimentPath {
        &self.source
    }

    pub fn target(&self) -> &ExperimentPath {
        &self.target
    }

    pub fn missing_scans(&self) -> &[MissingScan] {
        &self.missing_scans
    }

    pub fn differing_scans(&self) -> &[DifferingScan] {
        &self.differing_scans
    }

    pub fn missing_resources(&self) -> &[MissingResources] {
        &self.missing_resources
    }

    pub fn differing_resources(&self) -> &[DifferingResource] {
        &self.differing_resources
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Number of resource files missing across all folders
    pub fn missing_file_count(&self) -> usize {
        self.missing_resources.iter().map(|m| m.files.len()).sum()
    }

    /// True when nothing is missing and nothing differs
    pub fn is_clean(&self) -> bool {
        self.missing_scans.is_empty()
            && self.differing_scans.is_empty()
            && self.missing_resources.is_empty()
            && self.differing_resources.is_empty()
    }

    /// True when repair has something to upload
    pub fn has_missing(&self) -> bool {
        !self.missing_scans.is_empty() || !self.missing_resources.is_empty()
    }
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "{} matches {}", self.target, self.source);
        }
        write!(
            f,
            "{} vs {}: {} missing scans, {} differing scans, {} missing files, {} differing files",
            self.source,
            self.target,
            self.missing_scans.len(),
            self.differing_scans.len(),
            self.missing_file_count(),
            self.differing_resources.len()
        )
    }
}

/// One upload the repair step performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairItem {
    Scan {
        series: String,
        format: String,
    },
    ResourceFile {
        resource_id: String,
        folder_label: String,
        file: ResourceFile,
    },
}

impl RepairItem {
    /// Uploads needed to fill in everything the report lists as missing
    pub fn plan(report: &DiffReport) -> Vec<Self> {
        let scans = report.missing_scans().iter().map(|scan| Self::Scan {
            series: scan.series.clone(),
            format: scan.format.clone(),
        });
        let files = report.missing_resources().iter().flat_map(|missing| {
            missing.files.iter().map(move |file| Self::ResourceFile {
                resource_id: missing.resource_id.clone(),
                folder_label: missing.folder_label.clone(),
                file: file.clone(),
            })
        });
        scans.chain(files).collect()
    }
}

impl fmt::Display for RepairItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan { series, format } => write!(f, "series {} ({})", series, format),
            Self::ResourceFile {
                folder_label, file, ..
            } => write!(f, "{}/{}", folder_label, file.uri),
        }
    }
}

/// An upload that failed during repair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairFailure {
    pub item: RepairItem,
    pub reason: String,
}

/// What a repair run did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairSummary {
    pub source: ExperimentPath,
    pub target: ExperimentPath,
    pub dry_run: bool,
    /// Items uploaded, or that would be in a dry run
    pub repaired: Vec<RepairItem>,
    pub failures: Vec<RepairFailure>,
    pub finished_at: DateTime<Utc>,
}

impl RepairSummary {
    pub(crate) fn new(report: &DiffReport, dry_run: bool) -> Self {
        Self {
            source: report.source().clone(),
            target: report.target().clone(),
            dry_run,
            repaired: Vec::new(),
            failures: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.repaired.len() + self.failures.len()
    }
}

/// Progress notification passed to repair observers
#[derive(Debug, Clone, Copy)]
pub struct RepairProgress<'r> {
    /// Items handled so far, including this one
    pub done: usize,
    pub total: usize,
    pub item: &'r RepairItem,
    pub succeeded: bool,
}
