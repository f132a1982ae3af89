//! Best-effort repair of a mirror from a diff report
//!
//! Every missing item is downloaded from the source into a private temp
//! directory and uploaded to the target. A failed item is recorded and the
//! batch moves on; temp files are removed after each upload whatever its
//! outcome.

use std::path::Path;

use super::report::{DiffReport, RepairFailure, RepairItem, RepairProgress, RepairSummary};
use super::Reconciler;
use crate::app::catalog::ResourceFile;
use crate::constants::files;
use crate::errors::ArchiveResult;

impl<'a> Reconciler<'a> {
    /// Uploads everything `report` lists as missing
    ///
    /// Differing scans and files are reported only; they are not replaced.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Io` if the temp directory can't be created.
    /// Failures of individual items are collected in the summary instead.
    pub async fn repair(&self, report: &DiffReport) -> ArchiveResult<RepairSummary> {
        let plan = RepairItem::plan(report);
        let mut summary = RepairSummary::new(report, self.dry_run);

        if plan.is_empty() {
            tracing::debug!("Nothing to repair for {}", report.target());
            return Ok(summary);
        }

        if self.dry_run {
            for item in &plan {
                tracing::info!("Would upload {} to {}", item, report.target());
            }
            summary.repaired = plan;
            return Ok(summary);
        }

        let workdir = tempfile::Builder::new()
            .prefix(files::TEMP_FILE_PREFIX)
            .tempdir()?;
        tracing::info!(
            "Repairing {} items on {} from {}",
            plan.len(),
            report.target(),
            report.source()
        );

        let total = plan.len();
        for (index, item) in plan.into_iter().enumerate() {
            let staged = workdir.path().join(format!("item_{}", index));
            let result = match &item {
                RepairItem::Scan { series, format } => {
                    self.repair_scan(report, series, format, &staged).await
                }
                RepairItem::ResourceFile {
                    resource_id,
                    folder_label,
                    file,
                } => {
                    self.repair_file(report, resource_id, folder_label, file, &staged)
                        .await
                }
            };

            let succeeded = result.is_ok();
            if let Some(observer) = &self.observer {
                observer(RepairProgress {
                    done: index + 1,
                    total,
                    item: &item,
                    succeeded,
                });
            }

            match result {
                Ok(()) => summary.repaired.push(item),
                Err(e) => {
                    tracing::warn!("Failed repairing {} on {}: {}", item, report.target(), e);
                    summary.failures.push(RepairFailure {
                        item,
                        reason: e.to_string(),
                    });
                }
            }
        }

        summary.finished_at = chrono::Utc::now();
        if summary.is_success() {
            tracing::info!("Repaired {} items on {}", summary.repaired.len(), report.target());
        } else {
            tracing::error!(
                "{} of {} repairs failed on {}",
                summary.failures.len(),
                total,
                report.target()
            );
        }
        Ok(summary)
    }

    async fn repair_scan(
        &self,
        report: &DiffReport,
        series: &str,
        format: &str,
        staged: &Path,
    ) -> ArchiveResult<()> {
        let archive = self
            .source
            .download_series(report.source(), series, format, &staged.with_extension("zip"))
            .await?;
        let result = self.target.upload_dicom_archive(report.target(), &archive).await;
        remove_staged(&archive).await;
        result
    }

    async fn repair_file(
        &self,
        report: &DiffReport,
        resource_id: &str,
        folder_label: &str,
        file: &ResourceFile,
        staged: &Path,
    ) -> ArchiveResult<()> {
        let downloaded = self
            .source
            .download_resource(report.source(), resource_id, &file.uri, false, file.digest, staged)
            .await?;

        let file_name = file.decoded_uri();
        if file_name != file.uri {
            tracing::info!("File name changed from {} to {}", file.uri, file_name);
        }
        let result = self
            .target
            .upload_resource_file(report.target(), folder_label, &file_name, &downloaded)
            .await;
        remove_staged(&downloaded).await;
        result
    }
}

async fn remove_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed removing temp file {}: {}", path.display(), e);
        }
    }
}
