//! Actor-run scraping provider client
//!
//! Bearer-token HTTP client for the external scraper API: start a run,
//! poll its status, fetch the result dataset, or use the run-sync
//! single-call variant.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use url::Url;

use crate::infrastructure::http_client::HttpClient;
use crate::scraping::tasks::{RunStatus, ScrapeKind};
use crate::scraping::{RunStatusReport, ScrapeProvider};

/// Scraper API configuration
#[derive(Debug, Clone)]
pub struct ScraperApiConfig {
    /// API base, e.g. `https://api.apify.com/v2`.
    pub base_url: String,

    /// Actor id for product scrapes.
    pub product_actor_id: String,

    /// Actor id for review scrapes.
    pub review_actor_id: String,

    /// Proxy country routed through the actor input.
    pub country: String,

    /// Review-count limit per product.
    pub max_reviews: u32,

    /// Review sort order requested from the actor.
    pub review_sort: String,
}

impl Default for ScraperApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.apify.com/v2".to_string(),
            product_actor_id: "junglee~amazon-crawler".to_string(),
            review_actor_id: "junglee~amazon-reviews-scraper".to_string(),
            country: "US".to_string(),
            max_reviews: 100,
            review_sort: "recent".to_string(),
        }
    }
}

/// HTTP implementation of [`ScrapeProvider`].
pub struct ScraperApiClient {
    http: Arc<HttpClient>,
    config: ScraperApiConfig,
}

impl ScraperApiClient {
    #[must_use]
    pub fn new(http: Arc<HttpClient>, config: ScraperApiConfig) -> Self {
        Self { http, config }
    }

    const fn actor_for(&self, kind: ScrapeKind) -> &String {
        match kind {
            ScrapeKind::Product => &self.config.product_actor_id,
            ScrapeKind::Review => &self.config.review_actor_id,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Builds the actor input for a run: validated target URLs plus
    /// country/limit/sort configuration.
    fn run_input(&self, kind: ScrapeKind, targets: &[String]) -> Result<Value> {
        let mut urls = Vec::with_capacity(targets.len());
        for asin in targets {
            let url = Url::parse(&format!("https://www.amazon.com/dp/{asin}"))
                .with_context(|| format!("Invalid target ASIN: {asin}"))?;
            urls.push(json!({ "url": url.as_str() }));
        }

        Ok(match kind {
            ScrapeKind::Product => json!({
                "productUrls": urls,
                "countryCode": self.config.country,
            }),
            ScrapeKind::Review => json!({
                "productUrls": urls,
                "countryCode": self.config.country,
                "maxReviews": self.config.max_reviews,
                "sort": self.config.review_sort,
            }),
        })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self.http.post_json(url, body).await?;
        let status = response.status();
        if !status.is_success() {
            bail!("Scraper API returned HTTP {status} for {url}");
        }
        response
            .json()
            .await
            .with_context(|| format!("Failed to decode scraper API response from {url}"))
    }
}

#[async_trait]
impl ScrapeProvider for ScraperApiClient {
    async fn start_run(&self, kind: ScrapeKind, targets: &[String]) -> Result<String> {
        let input = self.run_input(kind, targets)?;
        let url = self.endpoint(&format!("acts/{}/runs", self.actor_for(kind)));
        let body = self.post(&url, &input).await?;

        body["data"]["id"]
            .as_str()
            .map(ToString::to_string)
            .context("Run submission response is missing data.id")
    }

    async fn run_status(&self, run_id: &str) -> Result<RunStatusReport> {
        let url = self.endpoint(&format!("actor-runs/{run_id}"));
        let body = self.http.get_json(&url).await?;

        let status = body["data"]["status"]
            .as_str()
            .context("Run status response is missing data.status")?;
        let progress = body["data"]["progressPercent"]
            .as_u64()
            .map(|p| p.min(100) as u8);

        Ok(RunStatusReport { status: RunStatus::parse(status), progress })
    }

    async fn dataset_items(&self, run_id: &str) -> Result<Vec<Value>> {
        let url = self.endpoint(&format!("actor-runs/{run_id}/dataset/items"));
        let body = self.http.get_json(&url).await?;

        match body {
            Value::Array(items) => Ok(items),
            _ => bail!("Dataset response for run {run_id} is not an array"),
        }
    }

    async fn run_sync(&self, kind: ScrapeKind, targets: &[String]) -> Result<Vec<Value>> {
        let input = self.run_input(kind, targets)?;
        let url = self.endpoint(&format!(
            "acts/{}/run-sync-get-dataset-items",
            self.actor_for(kind)
        ));
        let body = self.post(&url, &input).await?;

        match body {
            Value::Array(items) => Ok(items),
            _ => bail!("Run-sync response is not an array"),
        }
    }
}
