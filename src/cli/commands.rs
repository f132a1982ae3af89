//! Command handlers for the CLI
//!
//! Each handler resolves servers and credentials from the configuration,
//! opens the clients it needs and drives the library.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::app::{
    ArchiveClient, ArchiveIdentifier, DatmanId, DiffReport, ExperimentPath, Reconciler, Renamer,
    RepairSummary,
};
use crate::auth::{setup_credentials, show_auth_status, verify_credentials};
use crate::cli::args::{AuthAction, AuthArgs, RenameArgs, ShareAction, ShareArgs, VerifyArgs};
use crate::cli::progress::RepairProgressBar;
use crate::config::{AppConfig, ServerConfigToml};
use crate::errors::{AppError, Result};

/// An experiment verify couldn't compare
#[derive(Debug, Clone, Serialize)]
pub struct SkippedExperiment {
    pub experiment: String,
    pub reason: String,
}

/// Everything one verify run found and did
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub source_project: String,
    pub mirror_project: String,
    pub generated_at: DateTime<Utc>,
    pub differences: Vec<DiffReport>,
    pub repairs: Vec<RepairSummary>,
    pub skipped: Vec<SkippedExperiment>,
}

impl VerifyReport {
    fn new(args: &VerifyArgs) -> Self {
        Self {
            source_project: args.source_project.clone(),
            mirror_project: args.mirror_project.clone(),
            generated_at: Utc::now(),
            differences: Vec::new(),
            repairs: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn skip(&mut self, experiment: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Skipping {}: {}", experiment, reason);
        self.skipped.push(SkippedExperiment {
            experiment: experiment.to_string(),
            reason,
        });
    }
}

async fn connect(server: &ServerConfigToml, field: &str, config: &AppConfig) -> Result<ArchiveClient> {
    let url = server.server_url(field)?;
    let credentials = server.credentials()?;
    info!("Connecting to {}", url);
    Ok(ArchiveClient::connect(&url, credentials, config.to_runtime_config()).await?)
}

/// Handle the verify command
pub async fn handle_verify(args: VerifyArgs, config: &AppConfig, quiet: bool) -> Result<()> {
    let source = connect(&config.source, "source", config).await?;
    let mirror = connect(&config.mirror, "mirror", config).await?;

    let result = verify_projects(&args, config, &source, &mirror, quiet).await;

    source.close().await;
    mirror.close().await;

    let report = result?;
    write_verify_report(&report, args.output.as_deref()).await
}

async fn verify_projects(
    args: &VerifyArgs,
    config: &AppConfig,
    source: &ArchiveClient,
    mirror: &ArchiveClient,
    quiet: bool,
) -> Result<VerifyReport> {
    let mut report = VerifyReport::new(args);

    let experiments = match &args.experiment {
        Some(experiment) => vec![experiment.clone()],
        None => source.list_experiment_labels(&args.source_project, None).await?,
    };

    if experiments.is_empty() {
        warn!(
            "No experiments found on {} for {}, check the project name",
            source.server(),
            args.source_project
        );
        return Ok(report);
    }
    info!("Checking {} experiments", experiments.len());

    let reconciler = Reconciler::new(source, mirror);

    for experiment in &experiments {
        let datman = match DatmanId::parse(experiment) {
            Ok(id) => id,
            Err(e) => {
                report.skip(experiment, e.to_string());
                continue;
            }
        };

        if args.site.as_deref().is_some_and(|site| site != datman.site()) {
            debug!("{} is from another site", experiment);
            continue;
        }

        let kcni = match datman.to_kcni(&config.identifiers) {
            Ok(id) => id,
            Err(e) => {
                report.skip(experiment, e.to_string());
                continue;
            }
        };

        let source_path = ExperimentPath::new(
            args.source_project.as_str(),
            datman.xnat_subject_id(),
            datman.xnat_experiment_id(),
        );
        let mirror_path = ExperimentPath::new(
            args.mirror_project.as_str(),
            kcni.xnat_subject_id(),
            kcni.xnat_experiment_id(),
        );

        let diff = match reconciler.verify(&source_path, &mirror_path).await {
            Ok(diff) => diff,
            Err(e) if e.is_fatal_auth() => return Err(e.into()),
            Err(e) => {
                report.skip(experiment, e.to_string());
                continue;
            }
        };

        if args.fix && diff.has_missing() {
            let summary = repair(source, mirror, &diff, args.dry_run, quiet).await?;
            report.repairs.push(summary);
        }
        report.differences.push(diff);
    }

    Ok(report)
}

async fn repair(
    source: &ArchiveClient,
    mirror: &ArchiveClient,
    diff: &DiffReport,
    dry_run: bool,
    quiet: bool,
) -> Result<RepairSummary> {
    let total = crate::app::RepairItem::plan(diff).len();
    let progress = RepairProgressBar::new(total, &diff.target().experiment, quiet || dry_run)?;
    let observer = progress.clone();

    let summary = Reconciler::new(source, mirror)
        .with_dry_run(dry_run)
        .with_observer(move |event| observer.observe(event))
        .repair(diff)
        .await?;

    progress.finish(summary.failures.len());
    Ok(summary)
}

async fn write_verify_report(report: &VerifyReport, output: Option<&Path>) -> Result<()> {
    let changed: Vec<&DiffReport> = report.differences.iter().filter(|d| !d.is_clean()).collect();

    match output {
        Some(path) => {
            let json = serde_json::to_string_pretty(report)?;
            tokio::fs::write(path, json).await?;
            println!(
                "📄 Wrote {} differences to {}",
                changed.len(),
                path.display()
            );
        }
        None => {
            println!(
                "🔍 Checked {} experiments, {} with differences, {} skipped",
                report.differences.len(),
                changed.len(),
                report.skipped.len()
            );
            for diff in changed {
                println!("   {}", diff);
            }
        }
    }

    for summary in &report.repairs {
        if summary.dry_run {
            println!("🧪 Would upload {} items to {}", summary.repaired.len(), summary.target);
        } else if summary.is_success() {
            println!("✅ Uploaded {} items to {}", summary.repaired.len(), summary.target);
        } else {
            println!(
                "❌ {} of {} uploads to {} failed",
                summary.failures.len(),
                summary.total(),
                summary.target
            );
            for failure in &summary.failures {
                println!("   {}: {}", failure.item, failure.reason);
            }
        }
    }

    Ok(())
}

/// Handle the rename command
pub async fn handle_rename(args: RenameArgs, config: &AppConfig) -> Result<()> {
    let pairs = match (&args.file, args.pair()) {
        (Some(file), _) => read_name_pairs(file).await?,
        (None, Some((old, new))) => vec![(old.to_string(), new.to_string())],
        (None, None) => return Err(AppError::generic("Give either OLD and NEW or --file")),
    };

    let client = connect(&config.source, "source", config).await?;
    let renamer = Renamer::new(&client).with_attempts(config.rename.attempts);

    let mut failed = 0;
    for (old, new) in &pairs {
        let result = if args.experiment_only {
            let subject = args.subject.as_deref().unwrap_or(new);
            renamer
                .rename_experiment(&args.project, subject, old, new)
                .await
                .map(|outcome| outcome.attempts)
        } else {
            renamer
                .rename_session(&args.project, old, new, args.with_experiment)
                .await
                .map(|outcome| outcome.subject.attempts)
        };

        match result {
            Ok(0) => println!("✅ {} was already renamed to {}", old, new),
            Ok(_) => println!("✅ Renamed {} to {}", old, new),
            Err(e) if e.is_fatal_auth() => {
                client.close().await;
                return Err(e.into());
            }
            Err(e) => {
                error!("Failed to rename {} to {}: {}", old, new, e);
                println!("❌ Failed to rename {} to {}: {}", old, new, e);
                failed += 1;
            }
        }
    }

    client.close().await;

    if failed > 0 {
        return Err(AppError::generic(format!(
            "{} of {} renames failed",
            failed,
            pairs.len()
        )));
    }
    Ok(())
}

/// Read `old,new` pairs, skipping malformed lines
pub async fn read_name_pairs(path: &Path) -> Result<Vec<(String, String)>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(parse_name_pairs(&content))
}

fn parse_name_pairs(content: &str) -> Vec<(String, String)> {
    let pairs: Vec<(String, String)> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match fields.as_slice() {
                [old, new] if !old.is_empty() && !new.is_empty() => {
                    Some((old.to_string(), new.to_string()))
                }
                _ => {
                    error!("Invalid entry found: {}. Ignoring", line);
                    None
                }
            }
        })
        .collect();
    debug!("Found {} valid entries", pairs.len());
    pairs
}

/// Handle the share command
pub async fn handle_share(args: ShareArgs, config: &AppConfig) -> Result<()> {
    let client = connect(&config.source, "source", config).await?;

    let result = match &args.action {
        ShareAction::Subject {
            source_project,
            source_subject,
            dest_project,
            dest_subject,
        } => {
            client
                .share_subject(source_project, source_subject, dest_project, dest_subject)
                .await
        }
        ShareAction::Experiment {
            source_project,
            subject,
            experiment,
            dest_project,
            dest_experiment,
        } => {
            let source = ExperimentPath::new(source_project.as_str(), subject.as_str(), experiment.as_str());
            client
                .share_experiment(&source, dest_project, dest_experiment)
                .await
        }
    };

    client.close().await;
    result?;
    println!("✅ Shared");
    Ok(())
}

/// Handle authentication management commands
pub async fn handle_auth(args: AuthArgs, config: &AppConfig) -> Result<()> {
    let (server, field) = if args.mirror {
        (&config.mirror, "mirror")
    } else {
        (&config.source, "source")
    };
    let url = server.server_url(field)?;
    let client_config = config.to_runtime_config();

    match args.action {
        AuthAction::Setup { force } => {
            if force || !crate::auth::check_credentials() {
                setup_credentials(&url, &client_config).await?;
            } else {
                println!("✅ Credentials already configured. Use --force to update.");
            }
        }
        AuthAction::Verify => {
            let credentials = server.credentials()?;
            if verify_credentials(&url, &credentials, &client_config).await? {
                println!("✅ Credentials verified successfully");
            } else {
                println!("❌ Credential verification failed");
            }
        }
        AuthAction::Status => {
            show_auth_status(&url, &client_config).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_name_pairs_skips_invalid_lines() {
        let content = "OLD_1, NEW_1\nonly_one_field\n\nOLD_2,NEW_2,extra\nOLD_3,NEW_3\n,NEW_4\n";
        let pairs = parse_name_pairs(content);
        assert_eq!(
            pairs,
            vec![
                ("OLD_1".to_string(), "NEW_1".to_string()),
                ("OLD_3".to_string(), "NEW_3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_name_pairs_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("names.csv");
        tokio::fs::write(&path, "SPN01_CMH_0001_01_01,SPN01_CMH_0101_01_01\n")
            .await
            .unwrap();

        let pairs = read_name_pairs(&path).await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1, "SPN01_CMH_0101_01_01");
    }

    #[tokio::test]
    async fn test_verify_report_written_as_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("diffs.json");
        let args = VerifyArgs {
            source_project: "SPINS".to_string(),
            mirror_project: "SPN".to_string(),
            experiment: None,
            site: None,
            fix: false,
            dry_run: false,
            output: Some(path.clone()),
        };

        let mut report = VerifyReport::new(&args);
        report.skip("BAD_ID", "Can't parse BAD_ID as a Datman identifier");
        write_verify_report(&report, Some(&path)).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(written["source_project"], "SPINS");
        assert_eq!(written["skipped"][0]["experiment"], "BAD_ID");
    }
}
