//! # Scrape Work Queue
//!
//! In-memory prioritized work queue feeding the orchestrator. An explicitly
//! constructed, dependency-injected service instance owning its state in a
//! concurrent-safe map; state is not durable and is lost on restart by
//! design.
//!
//! Scheduling invariants:
//! - at most `max_concurrent` items are `processing` at any time
//! - items with `attempts >= max_retries` are never auto-selected again
//! - selection is priority-ordered, tie-broken by earliest enqueue time

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scraping::tasks::{ScrapeKind, TaskId};

lazy_static! {
    static ref ASIN_RE: Regex = Regex::new(r"^[A-Z0-9]{10}$").expect("valid ASIN regex");
}

/// Whether a string is a well-formed ASIN.
#[must_use]
pub fn is_valid_asin(asin: &str) -> bool {
    ASIN_RE.is_match(asin)
}

/// Queue tuning parameters.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of items in `processing` at once.
    pub max_concurrent: usize,

    /// Attempt ceiling before an item is parked as `failed`.
    pub max_retries: u32,

    /// Scheduler tick interval.
    pub tick_interval: Duration,

    /// Assumed duration of one scrape, used for progress estimation.
    pub assumed_duration: Duration,

    /// How long completed items stay visible before removal.
    pub completed_retention: Duration,

    /// How often to log queue statistics.
    pub stats_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 3,
            tick_interval: Duration::from_secs(1),
            assumed_duration: Duration::from_secs(90),
            completed_retention: Duration::from_secs(30),
            stats_interval: Duration::from_secs(30),
        }
    }
}

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// One unit of scraping work awaiting processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: TaskId,
    pub asin: String,
    pub kind: ScrapeKind,
    /// Higher priority is scheduled sooner.
    pub priority: i32,
    pub status: QueueItemStatus,
    /// Progress estimate in `0..=100`.
    pub progress: u8,
    pub attempts: u32,
    pub error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    fn new(asin: String, kind: ScrapeKind, priority: i32) -> Self {
        Self {
            id: TaskId::new(),
            asin,
            kind,
            priority,
            status: QueueItemStatus::Queued,
            progress: 0,
            attempts: 0,
            error: None,
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Elapsed-time progress estimate, clamped at 95 until the item reaches
    /// a terminal state. Not derived from true provider progress.
    #[must_use]
    pub fn progress_estimate(&self, assumed_duration: Duration) -> u8 {
        match self.status {
            QueueItemStatus::Queued => 0,
            QueueItemStatus::Completed => 100,
            QueueItemStatus::Failed => self.progress,
            QueueItemStatus::Processing => {
                let Some(started_at) = self.started_at else {
                    return 0;
                };
                let elapsed = (Utc::now() - started_at).num_milliseconds().max(0) as f64;
                let assumed = assumed_duration.as_millis().max(1) as f64;
                ((elapsed / assumed) * 100.0).min(95.0) as u8
            }
        }
    }

    const fn is_active(&self) -> bool {
        matches!(self.status, QueueItemStatus::Queued | QueueItemStatus::Processing)
    }
}

/// Queue operation errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("invalid ASIN: {0}")]
    InvalidAsin(String),

    #[error("item not found: {0}")]
    NotFound(TaskId),

    #[error("{asin} is already queued or processing")]
    Duplicate { asin: String },

    #[error("item {id} is not in a failed state")]
    NotFailed { id: TaskId },

    #[error("item {id} exhausted its {attempts} attempts")]
    RetryExhausted { id: TaskId, attempts: u32 },
}

/// Aggregate queue counters for monitoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_enqueued: u64,
    pub total_completed: u64,
    pub total_failed: u64,
}

/// Dispatch seam between the queue and the orchestrator.
#[async_trait]
pub trait QueueWorker: Send + Sync + 'static {
    /// Runs one unit of work to completion.
    async fn run(&self, item: &QueueItem) -> anyhow::Result<()>;

    /// Called once when an item is accepted into the queue.
    async fn on_enqueued(&self, item: &QueueItem) -> anyhow::Result<()> {
        let _ = item;
        Ok(())
    }
}

/// Prioritized in-memory work queue with bounded concurrency.
pub struct QueueManager {
    items: Arc<RwLock<HashMap<TaskId, QueueItem>>>,
    worker: Arc<dyn QueueWorker>,
    config: QueueConfig,
    cancellation_token: CancellationToken,
    total_enqueued: Arc<AtomicU64>,
    total_completed: Arc<AtomicU64>,
    total_failed: Arc<AtomicU64>,
}

impl QueueManager {
    #[must_use]
    pub fn new(worker: Arc<dyn QueueWorker>, config: QueueConfig) -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
            worker,
            config,
            cancellation_token: CancellationToken::new(),
            total_enqueued: Arc::new(AtomicU64::new(0)),
            total_completed: Arc::new(AtomicU64::new(0)),
            total_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Adds a new item to the queue.
    ///
    /// # Errors
    /// Rejects malformed ASINs and duplicates of items that are still
    /// queued or processing.
    pub async fn enqueue(
        &self,
        asin: &str,
        kind: ScrapeKind,
        priority: i32,
    ) -> Result<TaskId, QueueError> {
        if !is_valid_asin(asin) {
            return Err(QueueError::InvalidAsin(asin.to_string()));
        }

        let item = {
            let mut items = self.items.write().await;
            if items
                .values()
                .any(|i| i.asin == asin && i.kind == kind && i.is_active())
            {
                return Err(QueueError::Duplicate { asin: asin.to_string() });
            }
            let item = QueueItem::new(asin.to_string(), kind, priority);
            items.insert(item.id, item.clone());
            item
        };

        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        debug!("Enqueued {} scrape for {} (priority {})", kind.as_str(), asin, priority);

        if let Err(e) = self.worker.on_enqueued(&item).await {
            warn!("on_enqueued hook failed for {}: {:#}", item.asin, e);
        }

        Ok(item.id)
    }

    /// Starts the scheduler loop. Returns the join handle; the loop stops
    /// when [`Self::shutdown`] cancels the token.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone_for_task();
        let mut tick_interval = interval(self.config.tick_interval);
        let mut stats_interval = interval(self.config.stats_interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = manager.cancellation_token.cancelled() => {
                        debug!("Queue scheduler shutting down");
                        break;
                    }
                    _ = tick_interval.tick() => {
                        manager.tick().await;
                    }
                    _ = stats_interval.tick() => {
                        let stats = manager.stats().await;
                        info!(
                            "Queue stats: queued={}, processing={}, failed={}, total_completed={}",
                            stats.queued, stats.processing, stats.failed, stats.total_completed
                        );
                    }
                }
            }
        })
    }

    /// Requests scheduler shutdown.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }

    /// One scheduler pass: promote eligible items up to the concurrency
    /// bound, then drop completed items past their retention window.
    pub async fn tick(&self) {
        let to_dispatch = {
            let mut items = self.items.write().await;

            let processing = items
                .values()
                .filter(|i| i.status == QueueItemStatus::Processing)
                .count();
            let capacity = self.config.max_concurrent.saturating_sub(processing);

            let mut eligible: Vec<TaskId> = items
                .values()
                .filter(|i| {
                    i.status == QueueItemStatus::Queued && i.attempts < self.config.max_retries
                })
                .map(|i| i.id)
                .collect();
            eligible.sort_by(|a, b| {
                let ia = &items[a];
                let ib = &items[b];
                ib.priority
                    .cmp(&ia.priority)
                    .then(ia.enqueued_at.cmp(&ib.enqueued_at))
            });

            let mut dispatched = Vec::new();
            for id in eligible.into_iter().take(capacity) {
                if let Some(item) = items.get_mut(&id) {
                    item.status = QueueItemStatus::Processing;
                    item.attempts += 1;
                    item.started_at = Some(Utc::now());
                    item.error = None;
                    dispatched.push(item.clone());
                }
            }

            // Completed items are removed a fixed delay after finishing;
            // failed items are retained for manual retry.
            let retention = chrono::Duration::from_std(self.config.completed_retention)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
            let now = Utc::now();
            items.retain(|_, i| {
                !(i.status == QueueItemStatus::Completed
                    && i.completed_at.is_some_and(|t| now - t > retention))
            });

            dispatched
        };

        for item in to_dispatch {
            self.dispatch(item);
        }
    }

    fn dispatch(&self, item: QueueItem) {
        info!(
            "Dispatching {} scrape for {} (attempt {})",
            item.kind.as_str(),
            item.asin,
            item.attempts
        );

        let worker = Arc::clone(&self.worker);
        let items = Arc::clone(&self.items);
        let total_completed = Arc::clone(&self.total_completed);
        let total_failed = Arc::clone(&self.total_failed);

        tokio::spawn(async move {
            let result = worker.run(&item).await;

            let mut map = items.write().await;
            let Some(entry) = map.get_mut(&item.id) else {
                return;
            };
            entry.completed_at = Some(Utc::now());
            match result {
                Ok(()) => {
                    entry.status = QueueItemStatus::Completed;
                    entry.progress = 100;
                    total_completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Scrape for {} failed: {:#}", entry.asin, e);
                    entry.status = QueueItemStatus::Failed;
                    entry.error = Some(format!("{e:#}"));
                    total_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    /// Moves a failed item back to `queued` for another attempt.
    ///
    /// # Errors
    /// The item must exist, be `failed`, and have attempts remaining.
    pub async fn retry_failed(&self, id: TaskId) -> Result<(), QueueError> {
        let mut items = self.items.write().await;
        let item = items.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        if item.status != QueueItemStatus::Failed {
            return Err(QueueError::NotFailed { id });
        }
        if item.attempts >= self.config.max_retries {
            return Err(QueueError::RetryExhausted { id, attempts: item.attempts });
        }

        item.status = QueueItemStatus::Queued;
        item.progress = 0;
        item.error = None;
        item.started_at = None;
        item.completed_at = None;
        Ok(())
    }

    /// Removes all completed and failed items.
    pub async fn clear_finished(&self) {
        let mut items = self.items.write().await;
        items.retain(|_, i| i.is_active());
    }

    /// Snapshot of a single item.
    pub async fn item(&self, id: TaskId) -> Option<QueueItem> {
        let items = self.items.read().await;
        items.get(&id).map(|i| self.snapshot(i))
    }

    /// Snapshot of all items, oldest first.
    pub async fn items(&self) -> Vec<QueueItem> {
        let items = self.items.read().await;
        let mut all: Vec<QueueItem> = items.values().map(|i| self.snapshot(i)).collect();
        all.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        all
    }

    /// Current queue counters.
    pub async fn stats(&self) -> QueueStats {
        let items = self.items.read().await;
        let mut stats = QueueStats {
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_completed: self.total_completed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            ..Default::default()
        };
        for item in items.values() {
            match item.status {
                QueueItemStatus::Queued => stats.queued += 1,
                QueueItemStatus::Processing => stats.processing += 1,
                QueueItemStatus::Completed => stats.completed += 1,
                QueueItemStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    fn snapshot(&self, item: &QueueItem) -> QueueItem {
        let mut snapshot = item.clone();
        snapshot.progress = snapshot.progress_estimate(self.config.assumed_duration);
        snapshot
    }

    fn clone_for_task(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            worker: Arc::clone(&self.worker),
            config: self.config.clone(),
            cancellation_token: self.cancellation_token.clone(),
            total_enqueued: Arc::clone(&self.total_enqueued),
            total_completed: Arc::clone(&self.total_completed),
            total_failed: Arc::clone(&self.total_failed),
        }
    }
}
