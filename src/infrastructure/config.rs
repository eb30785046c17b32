//! Configuration infrastructure
//!
//! Application configuration lives in a JSON file in the platform config
//! directory; secrets (API token, webhook URL, database URL) can be
//! overridden through the environment. Every section carries serde defaults
//! so a partial file stays loadable across versions.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::domain::ViolationTaxonomy;
use crate::infrastructure::http_client::HttpClientConfig;
use crate::infrastructure::scraper_api::ScraperApiConfig;
use crate::scraping::orchestrator::OrchestratorConfig;
use crate::scraping::queue::QueueConfig;
use crate::violations::client::ClassifierConfig;
use crate::violations::scanner::{ScanConfig, ScanMode};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// External scraper API settings
    pub scraper: ScraperSettings,

    /// Violation classifier webhook settings
    pub classifier: ClassifierSettings,

    /// Violation scan pipeline settings
    pub scan: ScanSettings,

    /// Work queue settings
    pub queue: QueueSettings,

    /// Database connection settings
    pub database: DatabaseSettings,

    /// Logging settings
    pub logging: LoggingSettings,

    /// Shared HTTP client settings
    pub http: HttpSettings,

    /// Monitored products
    pub monitor: MonitorSettings,
}

/// External scraper API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperSettings {
    /// API base URL
    pub base_url: String,

    /// Bearer token (override: REVIEW_SENTINEL_API_TOKEN)
    pub token: String,

    /// Actor id for product scrapes
    pub product_actor_id: String,

    /// Actor id for review scrapes
    pub review_actor_id: String,

    /// Proxy country for actor runs
    pub country: String,

    /// Review-count limit per product
    pub max_reviews: u32,

    /// Review sort order
    pub review_sort: String,

    /// Seconds between status polls
    pub poll_interval_secs: u64,

    /// Maximum status polls per run
    pub max_poll_attempts: u32,

    /// Maximum seconds spent polling one run
    pub max_poll_duration_secs: u64,

    /// Chain a review scrape after each product ingest
    pub chain_review_scrape: bool,

    /// Use the single-call run-sync endpoint instead of submit-then-poll
    pub use_run_sync: bool,

    /// Run a violation scan after each review ingest
    pub auto_scan: bool,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        let api = ScraperApiConfig::default();
        Self {
            base_url: api.base_url,
            token: String::new(),
            product_actor_id: api.product_actor_id,
            review_actor_id: api.review_actor_id,
            country: api.country,
            max_reviews: api.max_reviews,
            review_sort: api.review_sort,
            poll_interval_secs: 5,
            max_poll_attempts: 120,
            max_poll_duration_secs: 600,
            chain_review_scrape: true,
            use_run_sync: false,
            auto_scan: false,
        }
    }
}

/// Violation classifier webhook settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Webhook URL (override: REVIEW_SENTINEL_WEBHOOK_URL)
    pub webhook_url: String,

    /// Attempt ceiling per classifier request
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds
    pub base_delay_ms: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Violation scan pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Submission mode: batched or single_shot
    pub mode: ScanMode,

    /// Reviews per batch in batched mode
    pub batch_size: usize,

    /// Milliseconds between batches
    pub batch_delay_ms: u64,

    /// Wall-clock budget for single-shot scans, in seconds
    pub overall_timeout_secs: u64,

    /// Simulated-progress window for single-shot scans, in seconds
    pub progress_window_secs: u64,

    /// Violation-type vocabulary: rich or collapsed
    pub taxonomy: ViolationTaxonomy,
}

impl Default for ScanSettings {
    fn default() -> Self {
        let scan = ScanConfig::default();
        Self {
            mode: scan.mode,
            batch_size: scan.batch_size,
            batch_delay_ms: scan.batch_delay.as_millis() as u64,
            overall_timeout_secs: scan.overall_timeout.as_secs(),
            progress_window_secs: scan.progress_window.as_secs(),
            taxonomy: scan.taxonomy,
        }
    }
}

/// Work queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum concurrently processing items
    pub max_concurrent: usize,

    /// Attempt ceiling per item
    pub max_retries: u32,

    /// Scheduler tick interval in milliseconds
    pub tick_interval_ms: u64,

    /// Assumed scrape duration for progress estimation, in seconds
    pub assumed_duration_secs: u64,

    /// Seconds completed items stay visible before removal
    pub completed_retention_secs: u64,

    /// Seconds between queue statistics log lines
    pub stats_interval_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        let queue = QueueConfig::default();
        Self {
            max_concurrent: queue.max_concurrent,
            max_retries: queue.max_retries,
            tick_interval_ms: queue.tick_interval.as_millis() as u64,
            assumed_duration_secs: queue.assumed_duration.as_secs(),
            completed_retention_secs: queue.completed_retention.as_secs(),
            stats_interval_secs: queue.stats_interval.as_secs(),
        }
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database URL (override: DATABASE_URL)
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { url: "sqlite:data/review-sentinel.db".to_string() }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: false,
        }
    }
}

/// Shared HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let http = HttpClientConfig::default();
        Self {
            user_agent: http.user_agent,
            timeout_seconds: http.timeout_seconds,
            max_requests_per_second: http.max_requests_per_second,
        }
    }
}

/// Monitored products enqueued at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// ASINs to keep monitored
    pub asins: Vec<String>,

    /// Priority used for startup enqueues
    pub priority: i32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self { asins: Vec::new(), priority: 0 }
    }
}

impl AppConfig {
    /// Path of the config file in the platform config directory.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("review-sentinel")
            .join("config.json")
    }

    /// Loads the configuration: file if present (a default file is written
    /// on first run), then environment overrides.
    pub async fn load() -> Result<Self> {
        let path = Self::default_config_path();
        let mut config = if path.exists() {
            Self::load_from(&path).await?
        } else {
            let config = Self::default();
            if let Err(e) = config.save_to(&path).await {
                tracing::warn!("Could not write default config to {}: {:#}", path.display(), e);
            }
            config
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads the configuration from a specific file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Writes the configuration to a specific file, creating parent
    /// directories as needed.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .await
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("REVIEW_SENTINEL_API_TOKEN") {
            self.scraper.token = token;
        }
        if let Ok(url) = std::env::var("REVIEW_SENTINEL_WEBHOOK_URL") {
            self.classifier.webhook_url = url;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
    }

    // ===============================
    // PER-MODULE CONFIG CONVERSIONS
    // ===============================

    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: Duration::from_secs(self.scraper.poll_interval_secs),
            max_poll_attempts: self.scraper.max_poll_attempts,
            max_poll_duration: Duration::from_secs(self.scraper.max_poll_duration_secs),
            chain_review_scrape: self.scraper.chain_review_scrape,
            use_run_sync: self.scraper.use_run_sync,
            auto_scan: self.scraper.auto_scan,
        }
    }

    #[must_use]
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.queue.max_concurrent,
            max_retries: self.queue.max_retries,
            tick_interval: Duration::from_millis(self.queue.tick_interval_ms),
            assumed_duration: Duration::from_secs(self.queue.assumed_duration_secs),
            completed_retention: Duration::from_secs(self.queue.completed_retention_secs),
            stats_interval: Duration::from_secs(self.queue.stats_interval_secs),
        }
    }

    #[must_use]
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            mode: self.scan.mode,
            batch_size: self.scan.batch_size,
            batch_delay: Duration::from_millis(self.scan.batch_delay_ms),
            overall_timeout: Duration::from_secs(self.scan.overall_timeout_secs),
            progress_window: Duration::from_secs(self.scan.progress_window_secs),
            taxonomy: self.scan.taxonomy,
        }
    }

    #[must_use]
    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            webhook_url: self.classifier.webhook_url.clone(),
            max_attempts: self.classifier.max_attempts,
            base_delay: Duration::from_millis(self.classifier.base_delay_ms),
        }
    }

    #[must_use]
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            user_agent: self.http.user_agent.clone(),
            timeout_seconds: self.http.timeout_seconds,
            max_requests_per_second: self.http.max_requests_per_second,
            bearer_token: (!self.scraper.token.is_empty()).then(|| self.scraper.token.clone()),
        }
    }

    #[must_use]
    pub fn scraper_api_config(&self) -> ScraperApiConfig {
        ScraperApiConfig {
            base_url: self.scraper.base_url.clone(),
            product_actor_id: self.scraper.product_actor_id.clone(),
            review_actor_id: self.scraper.review_actor_id.clone(),
            country: self.scraper.country.clone(),
            max_reviews: self.scraper.max_reviews,
            review_sort: self.scraper.review_sort.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = AppConfig::default();
        assert_eq!(config.queue.max_concurrent, 3);
        assert_eq!(config.classifier.max_attempts, 3);
        assert_eq!(config.scan.batch_size, 5);
        assert!(config.scraper.chain_review_scrape);
        assert!(config.database.url.starts_with("sqlite:"));
    }

    #[test]
    fn partial_file_fills_with_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "queue": { "max_concurrent": 7 } }"#).unwrap();
        assert_eq!(config.queue.max_concurrent, 7);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.scan.batch_size, 5);
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.monitor.asins = vec!["B000TEST01".to_string()];
        config.save_to(&path).await.unwrap();

        let loaded = AppConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded.monitor.asins, vec!["B000TEST01".to_string()]);
    }

    #[test]
    fn empty_token_yields_no_bearer() {
        let config = AppConfig::default();
        assert!(config.http_client_config().bearer_token.is_none());
    }
}
