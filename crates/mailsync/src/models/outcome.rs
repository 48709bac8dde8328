//! Per-resource outcomes and the aggregated run report

use serde::Serialize;
use std::fmt;

use super::{ResourceKey, SyncMode};
use crate::error::{ErrorKind, SyncError};

/// What happened to one resource during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OutcomeStatus {
    Created,
    Updated { fields: Vec<String> },
    Deleted,
    Unchanged,
    Skipped { reason: String },
    Failed { kind: ErrorKind, message: String },
}

/// Result for a single resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub key: ResourceKey,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl SyncOutcome {
    pub fn new(key: ResourceKey, status: OutcomeStatus) -> Self {
        Self { key, status }
    }

    pub fn failed(key: ResourceKey, error: &SyncError) -> Self {
        Self::new(
            key,
            OutcomeStatus::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
        )
    }

    pub fn skipped(key: ResourceKey, reason: impl Into<String>) -> Self {
        Self::new(
            key,
            OutcomeStatus::Skipped {
                reason: reason.into(),
            },
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed { .. })
    }

    /// Whether the remote now matches (or, in a dry run, would match) the desired state
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::Created
                | OutcomeStatus::Updated { .. }
                | OutcomeStatus::Deleted
                | OutcomeStatus::Unchanged
        )
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            OutcomeStatus::Created => write!(f, "{}: created", self.key),
            OutcomeStatus::Updated { fields } => {
                write!(f, "{}: updated [{}]", self.key, fields.join(", "))
            }
            OutcomeStatus::Deleted => write!(f, "{}: deleted", self.key),
            OutcomeStatus::Unchanged => write!(f, "{}: unchanged", self.key),
            OutcomeStatus::Skipped { reason } => write!(f, "{}: skipped ({})", self.key, reason),
            OutcomeStatus::Failed { kind, message } => {
                write!(f, "{}: failed [{}] {}", self.key, kind, message)
            }
        }
    }
}

/// Error that stopped a run early
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FatalError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SyncError> for FatalError {
    fn from(error: &SyncError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Counts derived from a report
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SyncStats {
    /// Number of resources created
    pub created: usize,
    /// Number of resources updated
    pub updated: usize,
    /// Number of resources deleted
    pub deleted: usize,
    /// Number of resources already in sync
    pub unchanged: usize,
    /// Number of resources left untouched
    pub skipped: usize,
    /// Number of resources that failed
    pub failed: usize,
}

/// Aggregated result of one run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub dry_run: bool,
    /// One entry per attempted resource, in processing order
    pub outcomes: Vec<SyncOutcome>,
    /// Set when a fatal error aborted the run
    pub aborted: Option<FatalError>,
    /// Set when a stop was requested before every resource was processed
    pub stopped: bool,
    /// Duration of the run
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn new(mode: SyncMode, dry_run: bool) -> Self {
        Self {
            mode,
            dry_run,
            outcomes: Vec::new(),
            aborted: None,
            stopped: false,
            duration_ms: 0,
        }
    }

    pub fn push(&mut self, outcome: SyncOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn abort(&mut self, error: &SyncError) {
        self.aborted = Some(FatalError::from(error));
    }

    pub fn outcome(&self, key: &ResourceKey) -> Option<&SyncOutcome> {
        self.outcomes.iter().find(|o| &o.key == key)
    }

    /// Whether every attempted resource succeeded and the run finished
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && !self.stopped && !self.outcomes.iter().any(SyncOutcome::is_failure)
    }

    pub fn stats(&self) -> SyncStats {
        let mut stats = SyncStats::default();
        for outcome in &self.outcomes {
            match outcome.status {
                OutcomeStatus::Created => stats.created += 1,
                OutcomeStatus::Updated { .. } => stats.updated += 1,
                OutcomeStatus::Deleted => stats.deleted += 1,
                OutcomeStatus::Unchanged => stats.unchanged += 1,
                OutcomeStatus::Skipped { .. } => stats.skipped += 1,
                OutcomeStatus::Failed { .. } => stats.failed += 1,
            }
        }
        stats
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            writeln!(f, "{}", outcome)?;
        }

        let stats = self.stats();
        write!(
            f,
            "{} sync{}: {} created, {} updated, {} deleted, {} unchanged, {} skipped, {} failed ({} ms)",
            self.mode,
            if self.dry_run { " (dry run)" } else { "" },
            stats.created,
            stats.updated,
            stats.deleted,
            stats.unchanged,
            stats.skipped,
            stats.failed,
            self.duration_ms,
        )?;

        if self.stopped {
            write!(f, "\nstopped before all resources were processed")?;
        }
        if let Some(fatal) = &self.aborted {
            write!(f, "\naborted: [{}] {}", fatal.kind, fatal.message)?;
        }
        Ok(())
    }
}
