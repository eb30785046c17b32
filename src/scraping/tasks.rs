//! # Scrape Task Definitions
//!
//! Task types for the scrape-run lifecycle. A task tracks one external
//! provider run from submission to a terminal state; it lives only in
//! process memory and is owned by the orchestrator that created it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for scraping work (tasks and queue items).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new unique task ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    #[must_use]
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TaskId> for Uuid {
    fn from(task_id: TaskId) -> Self {
        task_id.0
    }
}

/// Which actor a scrape run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeKind {
    Product,
    Review,
}

impl ScrapeKind {
    /// Returns the kind as a string for telemetry
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Review => "review",
        }
    }
}

/// Provider-side run status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Anything outside the documented vocabulary. Treated as terminal so a
    /// provider vocabulary change cannot wedge the poll budget.
    Unknown,
}

impl RunStatus {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "READY" => Self::Ready,
            "RUNNING" => Self::Running,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Whether the provider considers the run finished.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Unknown)
    }
}

/// Local lifecycle status of a scrape task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeTaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One external scraping run, from submission to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeTask {
    pub id: TaskId,
    /// Opaque run identifier assigned by the external provider.
    pub run_id: String,
    pub kind: ScrapeKind,
    pub targets: Vec<String>,
    pub status: ScrapeTaskStatus,
    /// Progress estimate in `0..=100`.
    pub progress: u8,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScrapeTask {
    /// Allocates a pending task for a freshly submitted run.
    #[must_use]
    pub fn new(run_id: String, kind: ScrapeKind, targets: Vec<String>) -> Self {
        Self {
            id: TaskId::new(),
            run_id,
            kind,
            targets,
            status: ScrapeTaskStatus::Pending,
            progress: 0,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn mark_processing(&mut self, progress: Option<u8>) {
        self.status = ScrapeTaskStatus::Processing;
        if let Some(progress) = progress {
            self.progress = progress.min(100);
        }
    }

    pub fn mark_completed(&mut self) {
        self.status = ScrapeTaskStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ScrapeTaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_is_unique() {
        let id1 = TaskId::new();
        let id2 = TaskId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn run_status_parses_provider_vocabulary() {
        assert_eq!(RunStatus::parse("READY"), RunStatus::Ready);
        assert_eq!(RunStatus::parse("RUNNING"), RunStatus::Running);
        assert_eq!(RunStatus::parse("SUCCEEDED"), RunStatus::Succeeded);
        assert_eq!(RunStatus::parse("FAILED"), RunStatus::Failed);
        assert_eq!(RunStatus::parse("ABORTING"), RunStatus::Unknown);
    }

    #[test]
    fn unknown_status_is_terminal() {
        assert!(RunStatus::Unknown.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn task_lifecycle_transitions() {
        let mut task = ScrapeTask::new(
            "run_1".into(),
            ScrapeKind::Product,
            vec!["B000TEST01".into()],
        );
        assert_eq!(task.status, ScrapeTaskStatus::Pending);
        assert!(task.completed_at.is_none());

        task.mark_processing(Some(40));
        assert_eq!(task.status, ScrapeTaskStatus::Processing);
        assert_eq!(task.progress, 40);

        task.mark_completed();
        assert_eq!(task.status, ScrapeTaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn failed_task_records_error() {
        let mut task = ScrapeTask::new("run_2".into(), ScrapeKind::Review, vec!["B000TEST01".into()]);
        task.mark_failed("provider reported failure");
        assert_eq!(task.status, ScrapeTaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("provider reported failure"));
    }
}
