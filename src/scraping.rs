//! # Scraping Domain Module
//!
//! Scrape-task lifecycle for the external actor-run provider: task types,
//! the supervised orchestrator, result ingestion, and the bounded work
//! queue feeding it.
//!
//! Modern Rust 2024 conventions:
//! - explicit module files (no mod.rs)
//! - dependency-injected service instances, no global singletons
//! - infrastructure reached through traits at the module seam

use async_trait::async_trait;
use serde_json::Value;

pub mod ingest;
pub mod orchestrator;
pub mod queue;
pub mod tasks;

// Clean re-exports
pub use ingest::{IngestReport, ResultIngestor};
pub use orchestrator::{OrchestratorConfig, ScrapeError, ScrapeOrchestrator};
pub use queue::{
    QueueConfig, QueueError, QueueItem, QueueItemStatus, QueueManager, QueueWorker,
    is_valid_asin,
};
pub use tasks::{RunStatus, ScrapeKind, ScrapeTask, ScrapeTaskStatus, TaskId};

/// Status report for one provider run, as returned by the poll endpoint.
#[derive(Debug, Clone)]
pub struct RunStatusReport {
    pub status: RunStatus,
    /// Percent complete if the provider reports one.
    pub progress: Option<u8>,
}

/// Seam to the external actor-run scraping provider.
///
/// Implemented by `infrastructure::scraper_api::ScraperApiClient`; tests
/// substitute scripted providers.
#[async_trait]
pub trait ScrapeProvider: Send + Sync {
    /// Submits a run for the given targets and returns the provider run id.
    async fn start_run(&self, kind: ScrapeKind, targets: &[String]) -> anyhow::Result<String>;

    /// Polls the status of a previously started run.
    async fn run_status(&self, run_id: &str) -> anyhow::Result<RunStatusReport>;

    /// Fetches the result dataset of a finished run as raw JSON items.
    async fn dataset_items(&self, run_id: &str) -> anyhow::Result<Vec<Value>>;

    /// Single-call variant: run to completion and return the dataset
    /// directly, without a separate poll.
    async fn run_sync(&self, kind: ScrapeKind, targets: &[String]) -> anyhow::Result<Vec<Value>>;
}
