//! Verified renames of subjects and experiments
//!
//! The archive's answer to a rename request can't be trusted: a conflict
//! is reported for renames that went through, and renames sometimes land
//! halfway. [`Renamer`] therefore treats every unclear answer as a reason to
//! re-query, and only reports success once the new name resolves with the
//! expected label.
//!
//! A rename moves through `Requested → Verifying → {Confirmed, Retrying,
//! Failed}`; each transition is logged at debug level and recorded in the
//! returned [`RenameOutcome`].

use std::fmt;

use serde::Serialize;

use crate::app::client::ArchiveClient;
use crate::app::models::{Experiment, ExperimentPath};
use crate::constants::limits;
use crate::errors::{ArchiveError, ArchiveResult};

/// States of the rename state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RenameState {
    Requested,
    Verifying,
    Confirmed,
    Retrying,
    Failed,
}

impl fmt::Display for RenameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::Verifying => "verifying",
            Self::Confirmed => "confirmed",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Which record a rename applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RenameKind {
    Subject,
    Experiment,
}

impl fmt::Display for RenameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject => f.write_str("subject"),
            Self::Experiment => f.write_str("experiment"),
        }
    }
}

/// Result of one confirmed rename
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameOutcome {
    pub kind: RenameKind,
    pub old: String,
    pub new: String,
    /// Requests issued; zero when the rename had already happened
    pub attempts: u32,
    /// Every state visited, in order
    pub states: Vec<RenameState>,
}

impl RenameOutcome {
    fn new(kind: RenameKind, old: &str, new: &str) -> Self {
        Self {
            kind,
            old: old.to_string(),
            new: new.to_string(),
            attempts: 0,
            states: Vec::new(),
        }
    }

    fn transition(&mut self, state: RenameState) {
        match self.states.last() {
            Some(previous) => tracing::debug!(
                "Rename of {} {} -> {}: {} -> {}",
                self.kind,
                self.old,
                self.new,
                previous,
                state
            ),
            None => tracing::debug!(
                "Rename of {} {} -> {}: {}",
                self.kind,
                self.old,
                self.new,
                state
            ),
        }
        self.states.push(state);
    }

    pub fn final_state(&self) -> Option<RenameState> {
        self.states.last().copied()
    }

    /// True when the new name already resolved before any request was sent
    pub fn already_done(&self) -> bool {
        self.attempts == 0
    }
}

/// Outcome of renaming a whole session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRename {
    pub subject: RenameOutcome,
    pub experiment: Option<RenameOutcome>,
}

/// Where the record being renamed lives
#[derive(Debug, Clone, Copy)]
struct Scope<'s> {
    kind: RenameKind,
    project: &'s str,
    subject: &'s str,
}

impl<'s> Scope<'s> {
    fn subject(project: &'s str) -> Self {
        Self {
            kind: RenameKind::Subject,
            project,
            subject: "",
        }
    }

    fn experiment(project: &'s str, subject: &'s str) -> Self {
        Self {
            kind: RenameKind::Experiment,
            project,
            subject,
        }
    }

    /// Label the record's parent must carry for a rename to count
    fn parent(&self) -> &str {
        match self.kind {
            RenameKind::Subject => self.project,
            RenameKind::Experiment => self.subject,
        }
    }
}

/// A record found while checking a rename
#[derive(Debug)]
struct Found {
    label: String,
    parent: String,
    experiment: Option<Experiment>,
}

impl Found {
    fn confirms(&self, scope: &Scope<'_>, new: &str) -> bool {
        self.label == new && self.parent == scope.parent()
    }
}

/// Drives renames on one archive to a verified outcome
#[derive(Debug)]
pub struct Renamer<'a> {
    client: &'a ArchiveClient,
    attempts: u32,
}

impl<'a> Renamer<'a> {
    pub fn new(client: &'a ArchiveClient) -> Self {
        Self {
            client,
            attempts: limits::RENAME_ATTEMPTS,
        }
    }

    /// Set the number of rename requests allowed; at least one is always made
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Renames a subject
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError` if:
    /// - The subject doesn't exist under either name (`NotFound`)
    /// - Both names exist (`NameInUse`)
    /// - Authentication failed (`Auth`)
    /// - The rename couldn't be confirmed within the budget; the error is
    ///   the one that first made the rename unclear
    pub async fn rename_subject(&self, project: &str, old: &str, new: &str) -> ArchiveResult<RenameOutcome> {
        self.drive(Scope::subject(project), old, new).await
    }

    /// Renames an experiment of `subject`
    ///
    /// Stuck AutoRun.xml workflows block renames, so they are dismissed
    /// first; failing to dismiss them is logged and the rename goes ahead.
    pub async fn rename_experiment(
        &self,
        project: &str,
        subject: &str,
        old: &str,
        new: &str,
    ) -> ArchiveResult<RenameOutcome> {
        self.drive(Scope::experiment(project, subject), old, new).await
    }

    /// Renames a subject and then, once that is confirmed, its experiment
    /// of the same name
    pub async fn rename_session(
        &self,
        project: &str,
        old: &str,
        new: &str,
        with_experiment: bool,
    ) -> ArchiveResult<SessionRename> {
        let subject = self.rename_subject(project, old, new).await?;

        let experiment = if with_experiment {
            Some(self.rename_experiment(project, new, old, new).await?)
        } else {
            None
        };

        tracing::info!("Renamed {} to {} in project {}", old, new, project);
        Ok(SessionRename { subject, experiment })
    }

    async fn drive(&self, scope: Scope<'_>, old: &str, new: &str) -> ArchiveResult<RenameOutcome> {
        let mut outcome = RenameOutcome::new(scope.kind, old, new);

        if old == new {
            outcome.transition(RenameState::Confirmed);
            return Ok(outcome);
        }

        let current = self.lookup(&scope, old).await?;
        let existing = self.lookup(&scope, new).await?;
        let current = match (current, existing) {
            (Some(_), Some(_)) => {
                return Err(ArchiveError::NameInUse {
                    name: new.to_string(),
                    reason: format!("{} {} already exists", scope.kind, new),
                });
            }
            (None, Some(found)) if found.confirms(&scope, new) => {
                tracing::info!("{} {} was already renamed to {}", scope.kind, old, new);
                outcome.transition(RenameState::Confirmed);
                return Ok(outcome);
            }
            (None, _) => {
                return Err(ArchiveError::not_found(format!(
                    "{} {} in project {}",
                    scope.kind, old, scope.project
                )));
            }
            (Some(found), None) => found,
        };

        if let Some(experiment) = &current.experiment {
            match self.client.dismiss_autorun(experiment).await {
                Ok(0) => {}
                Ok(count) => tracing::info!("Dismissed {} AutoRun.xml workflows for {}", count, old),
                Err(e) => tracing::error!(
                    "Failed to dismiss AutoRun.xml pipeline for {}, rename may fail: {}",
                    old,
                    e
                ),
            }
        }

        let mut target = old.to_string();
        let mut first_error: Option<ArchiveError> = None;

        loop {
            outcome.transition(RenameState::Requested);
            outcome.attempts += 1;

            let error = match self.issue(&scope, &target, new).await {
                Ok(()) => {
                    outcome.transition(RenameState::Confirmed);
                    return Ok(outcome);
                }
                Err(e) if e.is_fatal_auth() => return Err(e),
                Err(e) => e,
            };
            tracing::debug!("Rename of {} to {} answered: {}", target, new, error);
            let original = first_error.take().unwrap_or(error);

            outcome.transition(RenameState::Verifying);
            if let Some(found) = self.lookup(&scope, new).await? {
                if found.confirms(&scope, new) {
                    tracing::debug!("False alarm, {} {} is now {}", scope.kind, old, new);
                    outcome.transition(RenameState::Confirmed);
                    return Ok(outcome);
                }
            }

            if target != new && self.lookup(&scope, &target).await?.is_none() {
                tracing::debug!(
                    "Partial rename of {} to {}, searching under the new name",
                    target,
                    new
                );
                target = new.to_string();
            }

            if outcome.attempts >= self.attempts {
                outcome.transition(RenameState::Failed);
                tracing::error!(
                    "Giving up renaming {} {} to {} after {} attempts",
                    scope.kind,
                    old,
                    new,
                    outcome.attempts
                );
                return Err(original);
            }

            tracing::warn!(
                "Rename of {} to {} not confirmed, {} attempts left",
                old,
                new,
                self.attempts - outcome.attempts
            );
            first_error = Some(original);
            outcome.transition(RenameState::Retrying);
        }
    }

    async fn lookup(&self, scope: &Scope<'_>, name: &str) -> ArchiveResult<Option<Found>> {
        match scope.kind {
            RenameKind::Subject => Ok(self
                .client
                .find_subject(scope.project, name)
                .await?
                .map(|subject| Found {
                    label: subject.label,
                    parent: subject.project,
                    experiment: None,
                })),
            RenameKind::Experiment => {
                let Some(subject) = self.client.find_subject(scope.project, scope.subject).await? else {
                    return Ok(None);
                };
                let path = ExperimentPath::new(scope.project, scope.subject, name);
                Ok(self
                    .client
                    .find_experiment(&path)
                    .await?
                    .map(|experiment| Found {
                        label: experiment.label.clone(),
                        parent: subject.label.clone(),
                        experiment: Some(experiment),
                    }))
            }
        }
    }

    async fn issue(&self, scope: &Scope<'_>, old: &str, new: &str) -> ArchiveResult<()> {
        match scope.kind {
            RenameKind::Subject => self.client.rename_subject(scope.project, old, new).await,
            RenameKind::Experiment => {
                self.client
                    .rename_experiment(scope.project, scope.subject, old, new)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_records_transitions() {
        let mut outcome = RenameOutcome::new(RenameKind::Subject, "A_B_0001_01_01", "A_B_0002_01_01");
        assert!(outcome.final_state().is_none());

        outcome.transition(RenameState::Requested);
        outcome.transition(RenameState::Verifying);
        outcome.transition(RenameState::Confirmed);

        assert_eq!(
            outcome.states,
            vec![RenameState::Requested, RenameState::Verifying, RenameState::Confirmed]
        );
        assert_eq!(outcome.final_state(), Some(RenameState::Confirmed));
        assert!(outcome.already_done());
    }

    #[test]
    fn test_found_confirms_needs_parent() {
        // Test that an experiment found under another subject doesn't count
        let scope = Scope::experiment("SPINS", "SPN01_CMH_0002_01_01");
        let found = Found {
            label: "SPN01_CMH_0002_01_01".to_string(),
            parent: "SPN01_CMH_0001_01_01".to_string(),
            experiment: None,
        };
        assert!(!found.confirms(&scope, "SPN01_CMH_0002_01_01"));

        let found = Found {
            parent: "SPN01_CMH_0002_01_01".to_string(),
            ..found
        };
        assert!(found.confirms(&scope, "SPN01_CMH_0002_01_01"));
    }

    #[test]
    fn test_subject_scope_parent_is_project() {
        let scope = Scope::subject("SPINS");
        assert_eq!(scope.parent(), "SPINS");
        assert_eq!(scope.kind.to_string(), "subject");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(RenameState::Retrying.to_string(), "retrying");
        assert_eq!(RenameState::Failed.to_string(), "failed");
    }
}
