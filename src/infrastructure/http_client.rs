//! HTTP client for external API calls with rate limiting and error handling
//!
//! Provides a shared HTTP client for the scraping provider and the violation
//! classifier webhook, with respect for provider rate limits and bearer
//! authentication.

use anyhow::{Context, Result};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client, Response,
    header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT},
};
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;

/// HTTP client configuration for external API access
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    /// Bearer token attached to every request when set.
    pub bearer_token: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "review-sentinel/0.2".to_string(),
            timeout_seconds: 30,
            max_requests_per_second: 5,
            bearer_token: None,
        }
    }
}

/// Rate-limited HTTP client shared by the external integrations
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        // Setup headers
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        if let Some(token) = &config.bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("Invalid bearer token")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        // Build reqwest client
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        // Setup rate limiter
        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );
        let rate_limiter = RateLimiter::direct(quota);

        Ok(Self { client, rate_limiter, config })
    }

    /// Fetch a URL with rate limiting; non-2xx statuses are errors.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.rate_limiter.until_ready().await;

        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch URL: {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP request failed with status {}: {}", response.status(), url);
        }

        Ok(response)
    }

    /// Fetch a URL and decode the response body as JSON.
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self.get(url).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to decode JSON response from: {url}"))
    }

    /// POST a JSON body with rate limiting.
    ///
    /// Returns the raw response without a status check: callers with their
    /// own retry semantics classify non-2xx statuses themselves.
    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Response> {
        self.rate_limiter.until_ready().await;

        tracing::debug!("POST {}", url);
        self.client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to post to URL: {url}"))
    }

    /// Get the configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn http_client_creation() {
        let config = HttpClientConfig::default();
        assert_ok!(HttpClient::new(config));
    }

    #[test]
    fn bearer_token_is_accepted() {
        let config = HttpClientConfig {
            bearer_token: Some("apify_api_test".to_string()),
            ..Default::default()
        };
        let client = HttpClient::new(config).unwrap();
        assert!(client.config().bearer_token.is_some());
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let config = HttpClientConfig {
            max_requests_per_second: 0,
            ..Default::default()
        };
        assert!(HttpClient::new(config).is_err());
    }
}
