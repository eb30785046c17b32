//! # Scrape Orchestrator
//!
//! Drives one external scraping run to completion and materializes its
//! results into the store. Polling is supervised: a fixed interval with an
//! explicit attempt ceiling and wall-clock budget, cancellable through a
//! `CancellationToken`.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::ProductStatus;
use crate::infrastructure::product_repository::ProductRepository;
use crate::scraping::ingest::{IngestReport, ResultIngestor};
use crate::scraping::queue::{QueueItem, QueueWorker};
use crate::scraping::tasks::{RunStatus, ScrapeKind, ScrapeTask, ScrapeTaskStatus, TaskId};
use crate::scraping::{RunStatusReport, ScrapeProvider};
use crate::violations::scanner::ViolationScanner;

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Delay between status polls.
    pub poll_interval: Duration,

    /// Maximum number of status polls per run.
    pub max_poll_attempts: u32,

    /// Maximum wall-clock time spent polling one run.
    pub max_poll_duration: Duration,

    /// Whether a finished product scrape chains a review scrape for the
    /// same ASIN. This flag is the single source of truth for chaining.
    pub chain_review_scrape: bool,

    /// Use the provider's single-call run-sync endpoint instead of
    /// submit-then-poll.
    pub use_run_sync: bool,

    /// Run a violation scan over a product's stored reviews after its
    /// review scrape finishes.
    pub auto_scan: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 120,
            max_poll_duration: Duration::from_secs(600),
            chain_review_scrape: true,
            use_run_sync: false,
            auto_scan: false,
        }
    }
}

/// Orchestrator-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("run submission failed: {0}")]
    Submission(String),

    #[error("provider reported failure: {0}")]
    ProviderFailed(String),

    #[error("polling budget exhausted after {attempts} polls")]
    PollBudgetExhausted { attempts: u32 },

    #[error("scrape cancelled")]
    Cancelled,

    #[error("run {0} returned an empty result set")]
    EmptyResult(String),

    #[error("ingestion failed: {0}")]
    Ingestion(String),
}

/// Snapshot counters over the orchestrator's task map.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OrchestratorStats {
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

/// Coordinates scrape runs against the external provider.
///
/// Tasks are held only in process memory and owned by the instance that
/// created them; they are lost on restart.
pub struct ScrapeOrchestrator {
    provider: Arc<dyn ScrapeProvider>,
    ingestor: Arc<ResultIngestor>,
    products: Arc<ProductRepository>,
    scanner: Option<Arc<ViolationScanner>>,
    tasks: Arc<RwLock<HashMap<TaskId, ScrapeTask>>>,
    config: OrchestratorConfig,
    cancellation_token: CancellationToken,
}

impl ScrapeOrchestrator {
    #[must_use]
    pub fn new(
        provider: Arc<dyn ScrapeProvider>,
        ingestor: Arc<ResultIngestor>,
        products: Arc<ProductRepository>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            ingestor,
            products,
            scanner: None,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            config,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Attaches a violation scanner for post-ingest scans (`auto_scan`).
    #[must_use]
    pub fn with_scanner(mut self, scanner: Arc<ViolationScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Token cancelling all in-flight monitors of this instance.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Submits a product scrape and schedules its monitor. Returns the task
    /// id immediately; submission errors propagate.
    pub async fn start_product_scrape(&self, targets: Vec<String>) -> Result<TaskId, ScrapeError> {
        self.start_scrape(ScrapeKind::Product, targets).await
    }

    /// Submits a review scrape for one ASIN and schedules its monitor.
    pub async fn start_review_scrape(&self, asin: String) -> Result<TaskId, ScrapeError> {
        self.start_scrape(ScrapeKind::Review, vec![asin]).await
    }

    async fn start_scrape(
        &self,
        kind: ScrapeKind,
        targets: Vec<String>,
    ) -> Result<TaskId, ScrapeError> {
        let task_id = self.submit(kind, targets).await?;

        let orchestrator = self.clone_for_task();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.drive(task_id).await {
                warn!("Scrape task {} finished with error: {}", task_id, e);
            }
        });

        Ok(task_id)
    }

    /// Runs one scrape to completion: submit, poll, ingest. Used by the
    /// queue dispatch path, which needs completion semantics.
    pub async fn execute(&self, kind: ScrapeKind, targets: Vec<String>) -> Result<TaskId, ScrapeError> {
        if self.config.use_run_sync {
            return self.execute_run_sync(kind, targets).await;
        }
        let task_id = self.submit(kind, targets).await?;
        self.drive(task_id).await?;
        Ok(task_id)
    }

    async fn submit(&self, kind: ScrapeKind, targets: Vec<String>) -> Result<TaskId, ScrapeError> {
        info!("Submitting {} run for {} target(s)", kind.as_str(), targets.len());

        for asin in &targets {
            if let Err(e) = self.products.set_status(asin, ProductStatus::Refreshing).await {
                debug!("Could not mark {} refreshing: {:#}", asin, e);
            }
        }

        let run_id = self
            .provider
            .start_run(kind, &targets)
            .await
            .map_err(|e| ScrapeError::Submission(format!("{e:#}")))?;

        let task = ScrapeTask::new(run_id, kind, targets);
        let task_id = task.id;
        self.tasks.write().await.insert(task_id, task);
        Ok(task_id)
    }

    /// Single-call variant: no separate poll phase.
    async fn execute_run_sync(
        &self,
        kind: ScrapeKind,
        targets: Vec<String>,
    ) -> Result<TaskId, ScrapeError> {
        let task = ScrapeTask::new(String::new(), kind, targets.clone());
        let task_id = task.id;
        self.tasks.write().await.insert(task_id, task);

        let items = match self.provider.run_sync(kind, &targets).await {
            Ok(items) => items,
            Err(e) => {
                let message = format!("{e:#}");
                self.fail_task(task_id, &message).await;
                return Err(ScrapeError::ProviderFailed(message));
            }
        };

        self.finish_task(task_id, kind, &items).await?;
        Ok(task_id)
    }

    /// Drives a submitted run to a terminal state.
    ///
    /// Boxed: a product run chains a review run, so the monitor future is
    /// recursive.
    fn drive(&self, task_id: TaskId) -> BoxFuture<'_, Result<(), ScrapeError>> {
        async move {
            let (run_id, kind) = {
                let tasks = self.tasks.read().await;
                let task = tasks.get(&task_id).ok_or(ScrapeError::Cancelled)?;
                (task.run_id.clone(), task.kind)
            };

            self.poll_until_succeeded(task_id, &run_id).await?;

            let items = match self.provider.dataset_items(&run_id).await {
                Ok(items) => items,
                Err(e) => {
                    let message = format!("{e:#}");
                    self.fail_task(task_id, &message).await;
                    return Err(ScrapeError::ProviderFailed(message));
                }
            };

            self.finish_task(task_id, kind, &items).await
        }
        .boxed()
    }

    /// Supervised poll loop: bounded by attempts and wall-clock, cancelled
    /// through the orchestrator token.
    async fn poll_until_succeeded(&self, task_id: TaskId, run_id: &str) -> Result<(), ScrapeError> {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            if self.cancellation_token.is_cancelled() {
                self.fail_task(task_id, "cancelled").await;
                return Err(ScrapeError::Cancelled);
            }
            if attempts >= self.config.max_poll_attempts
                || started.elapsed() > self.config.max_poll_duration
            {
                self.fail_task(task_id, "polling budget exhausted").await;
                return Err(ScrapeError::PollBudgetExhausted { attempts });
            }
            attempts += 1;

            match self.provider.run_status(run_id).await {
                Ok(RunStatusReport { status: RunStatus::Succeeded, .. }) => {
                    debug!("Run {} succeeded after {} polls", run_id, attempts);
                    return Ok(());
                }
                Ok(RunStatusReport { status: RunStatus::Failed, .. }) => {
                    let message = format!("run {run_id} failed");
                    self.fail_task(task_id, &message).await;
                    return Err(ScrapeError::ProviderFailed(message));
                }
                Ok(RunStatusReport { status: RunStatus::Unknown, .. }) => {
                    let message = format!("run {run_id} reported an unknown status");
                    self.fail_task(task_id, &message).await;
                    return Err(ScrapeError::ProviderFailed(message));
                }
                Ok(report) => {
                    let mut tasks = self.tasks.write().await;
                    if let Some(task) = tasks.get_mut(&task_id) {
                        task.mark_processing(report.progress);
                    }
                }
                Err(e) => {
                    // Transient poll errors burn an attempt and retry.
                    warn!("Status poll {} for run {} failed: {:#}", attempts, run_id, e);
                }
            }

            tokio::select! {
                _ = self.cancellation_token.cancelled() => {}
                _ = sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Validates and ingests a finished run's result set, then applies the
    /// chained follow-up work.
    async fn finish_task(
        &self,
        task_id: TaskId,
        kind: ScrapeKind,
        items: &[serde_json::Value],
    ) -> Result<(), ScrapeError> {
        if items.is_empty() {
            let run_id = self.run_id_of(task_id).await;
            self.fail_task(task_id, "empty result set").await;
            return Err(ScrapeError::EmptyResult(run_id));
        }

        let report = match self.ingestor.ingest(kind, items).await {
            Ok(report) => report,
            Err(e) => {
                let message = format!("{e:#}");
                self.fail_task(task_id, &message).await;
                return Err(ScrapeError::Ingestion(message));
            }
        };

        info!(
            "Ingested {} run: {} products, {} reviews, {} skipped",
            kind.as_str(),
            report.products_upserted,
            report.reviews_upserted,
            report.skipped
        );

        {
            let mut tasks = self.tasks.write().await;
            if let Some(task) = tasks.get_mut(&task_id) {
                task.mark_completed();
            }
        }

        self.follow_up(kind, &report).await;
        Ok(())
    }

    /// Chained follow-up after a successful ingest.
    async fn follow_up(&self, kind: ScrapeKind, report: &IngestReport) {
        match kind {
            ScrapeKind::Product if self.config.chain_review_scrape => {
                for asin in &report.product_asins {
                    match self.start_review_scrape(asin.clone()).await {
                        Ok(task_id) => {
                            debug!("Chained review scrape {} for {}", task_id, asin);
                        }
                        Err(e) => warn!("Failed to chain review scrape for {}: {}", asin, e),
                    }
                }
            }
            ScrapeKind::Review if self.config.auto_scan => {
                let Some(scanner) = &self.scanner else {
                    return;
                };
                for asin in &report.product_asins {
                    let reviews = match self.products.get_reviews(asin).await {
                        Ok(reviews) => reviews,
                        Err(e) => {
                            warn!("Could not load reviews of {} for scanning: {:#}", asin, e);
                            continue;
                        }
                    };
                    match scanner.scan(&reviews, self.cancellation_token.child_token()).await {
                        Ok(outcome) => info!("Violation scan for {}: {:?}", asin, outcome),
                        Err(e) => warn!("Violation scan for {} failed: {}", asin, e),
                    }
                }
            }
            _ => {}
        }
    }

    /// Current snapshot of one task.
    pub async fn task(&self, task_id: TaskId) -> Option<ScrapeTask> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    /// Current snapshot of all tasks.
    pub async fn tasks(&self) -> Vec<ScrapeTask> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Counters over the task map.
    pub async fn stats(&self) -> OrchestratorStats {
        let tasks = self.tasks.read().await;
        let mut stats = OrchestratorStats::default();
        for task in tasks.values() {
            match task.status {
                ScrapeTaskStatus::Pending | ScrapeTaskStatus::Processing => {
                    stats.active_tasks += 1;
                }
                ScrapeTaskStatus::Completed => stats.completed_tasks += 1,
                ScrapeTaskStatus::Failed => stats.failed_tasks += 1,
            }
        }
        stats
    }

    async fn run_id_of(&self, task_id: TaskId) -> String {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .map(|t| t.run_id.clone())
            .unwrap_or_default()
    }

    async fn fail_task(&self, task_id: TaskId, message: &str) {
        error!("Scrape task {} failed: {}", task_id, message);
        let targets = {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get_mut(&task_id) else {
                return;
            };
            task.mark_failed(message);
            task.targets.clone()
        };
        for asin in targets {
            if let Err(e) = self.products.set_status(&asin, ProductStatus::Error).await {
                debug!("Could not mark {} errored: {:#}", asin, e);
            }
        }
    }

    fn clone_for_task(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            ingestor: Arc::clone(&self.ingestor),
            products: Arc::clone(&self.products),
            scanner: self.scanner.clone(),
            tasks: Arc::clone(&self.tasks),
            config: self.config.clone(),
            cancellation_token: self.cancellation_token.clone(),
        }
    }
}

#[async_trait::async_trait]
impl QueueWorker for ScrapeOrchestrator {
    async fn run(&self, item: &QueueItem) -> anyhow::Result<()> {
        self.execute(item.kind, vec![item.asin.clone()]).await?;
        Ok(())
    }

    async fn on_enqueued(&self, item: &QueueItem) -> anyhow::Result<()> {
        self.products.set_status(&item.asin, ProductStatus::Queued).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn orchestrator_config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_poll_attempts, 120);
        assert!(config.chain_review_scrape);
        assert!(!config.use_run_sync);
    }

    #[test]
    fn scrape_error_messages_are_distinct() {
        let budget = ScrapeError::PollBudgetExhausted { attempts: 7 }.to_string();
        assert!(budget.contains("7 polls"));
        assert_ne!(budget, ScrapeError::Cancelled.to_string());
    }
}
