//! # Violation Scan Pipeline
//!
//! Submits a bounded batch of reviews to the classifier and persists the
//! findings. Batches run strictly sequentially with a fixed inter-batch
//! delay; submissions within a batch run concurrently. A stop request is
//! honored at batch boundaries only: an in-flight classifier call is never
//! cancelled except by the single-shot wall-clock timeout.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{Review, ViolationFinding, ViolationTaxonomy};
use crate::infrastructure::violation_repository::ViolationRepository;
use crate::violations::client::{ClassifierError, ReviewClassifier, ReviewPayload};

/// How reviews are submitted to the classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Fixed-size batches, sequential, with an inter-batch delay.
    #[default]
    Batched,
    /// The entire review set in one request under a wall-clock timeout.
    SingleShot,
}

/// Scan pipeline configuration.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub mode: ScanMode,

    /// Reviews per batch in batched mode.
    pub batch_size: usize,

    /// Delay between batches, to stay inside provider rate limits.
    pub batch_delay: Duration,

    /// Wall-clock budget for the single-shot request.
    pub overall_timeout: Duration,

    /// Window over which the single-shot progress estimate advances.
    pub progress_window: Duration,

    /// Violation-type vocabulary applied to persisted findings.
    pub taxonomy: ViolationTaxonomy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mode: ScanMode::Batched,
            batch_size: 5,
            batch_delay: Duration::from_millis(500),
            overall_timeout: Duration::from_secs(15 * 60),
            progress_window: Duration::from_secs(60),
            taxonomy: ViolationTaxonomy::default(),
        }
    }
}

/// Terminal outcome of a scan that did not error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ScanOutcome {
    /// Every scannable review was submitted.
    Completed { scanned: usize, skipped: usize, flagged: usize },
    /// The stop flag was honored at a batch boundary; results persisted so
    /// far are kept.
    Stopped { scanned: usize, skipped: usize, flagged: usize },
}

/// Scan pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    /// Distinct from other terminal failures in the user-visible message.
    #[error("violation scan timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Default)]
struct ScanProgress {
    started: Option<Instant>,
    batches_done: usize,
    batches_total: usize,
    running: bool,
}

/// Violation scan pipeline over stored reviews.
pub struct ViolationScanner {
    classifier: Arc<dyn ReviewClassifier>,
    violations: Arc<ViolationRepository>,
    config: ScanConfig,
    progress: Arc<RwLock<ScanProgress>>,
}

impl ViolationScanner {
    #[must_use]
    pub fn new(
        classifier: Arc<dyn ReviewClassifier>,
        violations: Arc<ViolationRepository>,
        config: ScanConfig,
    ) -> Self {
        Self {
            classifier,
            violations,
            config,
            progress: Arc::new(RwLock::new(ScanProgress::default())),
        }
    }

    /// Progress estimate in `0..=100`.
    ///
    /// Batched mode reports batch completion; single-shot mode simulates
    /// progress over a fixed window (it does not reflect true provider
    /// progress) and is clamped at 95 until the scan finishes.
    pub async fn progress(&self) -> u8 {
        let progress = self.progress.read().await;
        if !progress.running {
            return if progress.started.is_some() { 100 } else { 0 };
        }
        match self.config.mode {
            ScanMode::Batched => {
                if progress.batches_total == 0 {
                    0
                } else {
                    ((progress.batches_done * 100 / progress.batches_total) as u8).min(95)
                }
            }
            ScanMode::SingleShot => {
                let elapsed = progress.started.map_or(0.0, |s| s.elapsed().as_secs_f64());
                let window = self.config.progress_window.as_secs_f64().max(f64::EPSILON);
                ((elapsed / window) * 100.0).min(95.0) as u8
            }
        }
    }

    /// Runs one scan over the given reviews.
    ///
    /// Reviews with a blank identifier or whitespace-only body are excluded
    /// from submission and from the result counters' `scanned` total.
    pub async fn scan(
        &self,
        reviews: &[Review],
        stop: CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        let scannable: Vec<&Review> = reviews.iter().filter(|r| r.is_scannable()).collect();
        let skipped = reviews.len() - scannable.len();
        if skipped > 0 {
            info!("Excluding {} review(s) without id or content from scan", skipped);
        }

        {
            let mut progress = self.progress.write().await;
            *progress = ScanProgress {
                started: Some(Instant::now()),
                batches_done: 0,
                batches_total: scannable.len().div_ceil(self.config.batch_size.max(1)),
                running: true,
            };
        }

        let result = match self.config.mode {
            ScanMode::Batched => self.scan_batched(&scannable, skipped, &stop).await,
            ScanMode::SingleShot => self.scan_single_shot(&scannable, skipped, &stop).await,
        };

        self.progress.write().await.running = false;
        result
    }

    async fn scan_batched(
        &self,
        scannable: &[&Review],
        skipped: usize,
        stop: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        let mut scanned = 0;
        let mut flagged = 0;

        for (index, batch) in scannable.chunks(self.config.batch_size.max(1)).enumerate() {
            if index > 0 {
                sleep(self.config.batch_delay).await;
            }
            if stop.is_cancelled() {
                info!("Scan stopped before batch {}; keeping persisted results", index + 1);
                return Ok(ScanOutcome::Stopped { scanned, skipped, flagged });
            }

            // Reviews within a batch are submitted concurrently; completion
            // order is not significant.
            let payloads: Vec<ReviewPayload> =
                batch.iter().map(|r| ReviewPayload::from_review(r)).collect();
            let calls = payloads
                .iter()
                .map(|payload| self.classifier.classify(std::slice::from_ref(payload)));
            let results = join_all(calls).await;

            for (review, result) in batch.iter().zip(results) {
                let by_review = result?;
                scanned += 1;
                if self.persist_findings(review, by_review.get(&review.review_id)).await {
                    flagged += 1;
                }
            }

            self.progress.write().await.batches_done = index + 1;
        }

        Ok(ScanOutcome::Completed { scanned, skipped, flagged })
    }

    async fn scan_single_shot(
        &self,
        scannable: &[&Review],
        skipped: usize,
        stop: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        if stop.is_cancelled() {
            return Ok(ScanOutcome::Stopped { scanned: 0, skipped, flagged: 0 });
        }

        let payloads: Vec<ReviewPayload> =
            scannable.iter().map(|r| ReviewPayload::from_review(r)).collect();

        let by_review = match timeout(
            self.config.overall_timeout,
            self.classifier.classify(&payloads),
        )
        .await
        {
            Err(_) => return Err(ScanError::Timeout(self.config.overall_timeout)),
            Ok(result) => result?,
        };

        let mut flagged = 0;
        for review in scannable {
            if self.persist_findings(review, by_review.get(&review.review_id)).await {
                flagged += 1;
            }
        }

        Ok(ScanOutcome::Completed { scanned: scannable.len(), skipped, flagged })
    }

    /// Persists one review's findings, best-effort: storage failures are
    /// logged and do not abort the scan. Returns whether the review was
    /// flagged.
    async fn persist_findings(
        &self,
        review: &Review,
        raw: Option<&Vec<crate::violations::client::RawFinding>>,
    ) -> bool {
        let Some(raw) = raw else {
            return false;
        };
        if raw.is_empty() {
            return false;
        }

        let findings: Vec<ViolationFinding> = raw
            .iter()
            .cloned()
            .map(|f| f.into_finding(self.config.taxonomy))
            .collect();

        if let Err(e) = self
            .violations
            .record_findings(&review.review_id, &review.asin, &findings, Utc::now())
            .await
        {
            warn!("Failed to store findings for review {}: {:#}", review.review_id, e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_config_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.mode, ScanMode::Batched);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.batch_delay, Duration::from_millis(500));
        assert_eq!(config.overall_timeout, Duration::from_secs(900));
    }

    #[test]
    fn timeout_error_is_distinct() {
        let timeout = ScanError::Timeout(Duration::from_secs(900)).to_string();
        assert!(timeout.contains("timed out"));
        let classifier = ScanError::Classifier(ClassifierError::EmptyBody).to_string();
        assert_ne!(timeout, classifier);
    }

    #[test]
    fn scan_mode_serializes_snake_case() {
        assert_eq!(serde_json::to_value(ScanMode::SingleShot).unwrap(), "single_shot");
        assert_eq!(serde_json::to_value(ScanMode::Batched).unwrap(), "batched");
    }
}
