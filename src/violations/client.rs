//! # Violation Classifier Client
//!
//! HTTP client for the webhook-based violation classifier. Requests retry
//! with exponential backoff; a non-2xx status, an empty body, and a JSON
//! parse failure all count as retryable failures, and exhausting the
//! attempt ceiling surfaces the last error to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::{
    RecommendedAction, Review, Severity, UserBenefit, ViolationFinding, ViolationTaxonomy,
};
use crate::infrastructure::http_client::HttpClient;

/// Classifier client configuration.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Webhook URL of the classifier workflow.
    pub webhook_url: String,

    /// Attempt ceiling per request.
    pub max_attempts: u32,

    /// Base delay for exponential backoff (`base * 2^(attempt-1)`).
    pub base_delay: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Classifier call errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("classifier returned HTTP {status}")]
    Http { status: u16 },

    #[error("classifier returned an empty body")]
    EmptyBody,

    #[error("failed to parse classifier response: {0}")]
    Decode(String),

    #[error("unrecognized classifier response shape")]
    UnrecognizedShape,
}

impl ClassifierError {
    /// Whether another attempt may succeed. A well-formed response in an
    /// unknown envelope is terminal: retrying cannot change the contract.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnrecognizedShape)
    }
}

/// Backoff delay before retry `attempt + 1`, without jitter.
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2_u32.saturating_pow(attempt.saturating_sub(1))
}

/// Normalized review shape submitted to the classifier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPayload {
    pub id: String,
    pub content: String,
    pub rating: i32,
    pub date: Option<String>,
    pub author: Option<String>,
    pub verified: bool,
    pub asin: String,
    pub helpful_votes: i64,
    pub total_votes: i64,
    pub variant: Option<String>,
}

impl ReviewPayload {
    #[must_use]
    pub fn from_review(review: &Review) -> Self {
        Self {
            id: review.review_id.clone(),
            content: review.body.clone(),
            rating: review.rating,
            date: review.review_date.map(|d| d.to_rfc3339()),
            author: review.author_name.clone(),
            verified: review.verified_purchase,
            asin: review.asin.clone(),
            helpful_votes: review.helpful_votes,
            total_votes: review.total_votes,
            variant: review.variant.clone(),
        }
    }
}

/// One finding as returned on the wire, before taxonomy normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFinding {
    #[serde(rename = "type")]
    pub violation_type: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default, rename = "userBenefit")]
    pub user_benefit: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl RawFinding {
    /// Converts the wire finding into a domain finding under the given
    /// taxonomy.
    #[must_use]
    pub fn into_finding(self, taxonomy: ViolationTaxonomy) -> ViolationFinding {
        ViolationFinding {
            violation_type: self.violation_type,
            category: None,
            severity: self.severity.as_deref().map_or(Severity::Medium, Severity::parse),
            user_benefit: self.user_benefit.as_deref().and_then(UserBenefit::parse),
            action: self.action.as_deref().map_or(RecommendedAction::Keep, RecommendedAction::parse),
            details: self.details,
        }
        .normalized(taxonomy)
    }
}

/// Findings per review id.
pub type FindingsByReview = HashMap<String, Vec<RawFinding>>;

/// Seam to the external violation classifier.
#[async_trait]
pub trait ReviewClassifier: Send + Sync {
    /// Classifies a set of reviews and returns findings keyed by review id.
    async fn classify(&self, reviews: &[ReviewPayload]) -> Result<FindingsByReview, ClassifierError>;
}

#[derive(Deserialize)]
struct ReportEnvelope {
    violations: Vec<RawFinding>,
}

#[derive(Deserialize)]
struct ResultsEnvelope {
    results: Vec<ResultEntry>,
}

#[derive(Deserialize)]
struct ResultEntry {
    #[serde(rename = "reviewId", alias = "id")]
    review_id: String,
    #[serde(default)]
    violations: Vec<RawFinding>,
}

/// Decodes one of the three known classifier response envelopes:
///
/// 1. a single report object with a `violations` field,
/// 2. a `results` array of per-review entries,
/// 3. a map keyed by review id.
///
/// Anything else is [`ClassifierError::UnrecognizedShape`].
pub fn decode_response(
    review_ids: &[String],
    body: &str,
) -> Result<FindingsByReview, ClassifierError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| ClassifierError::Decode(e.to_string()))?;

    let Some(object) = value.as_object() else {
        return Err(ClassifierError::UnrecognizedShape);
    };

    if object.contains_key("violations") {
        // Single-report envelope: only meaningful for a single submission.
        let [review_id] = review_ids else {
            return Err(ClassifierError::UnrecognizedShape);
        };
        let report: ReportEnvelope = serde_json::from_value(value.clone())
            .map_err(|e| ClassifierError::Decode(e.to_string()))?;
        return Ok(HashMap::from([(review_id.clone(), report.violations)]));
    }

    if object.contains_key("results") {
        let envelope: ResultsEnvelope = serde_json::from_value(value.clone())
            .map_err(|e| ClassifierError::Decode(e.to_string()))?;
        return Ok(envelope
            .results
            .into_iter()
            .map(|entry| (entry.review_id, entry.violations))
            .collect());
    }

    // Map keyed by review id: every value must be a findings array.
    if !object.is_empty() && object.values().all(Value::is_array) {
        let mut by_review = HashMap::with_capacity(object.len());
        for (review_id, findings) in object {
            let findings: Vec<RawFinding> = serde_json::from_value(findings.clone())
                .map_err(|e| ClassifierError::Decode(e.to_string()))?;
            by_review.insert(review_id.clone(), findings);
        }
        return Ok(by_review);
    }

    Err(ClassifierError::UnrecognizedShape)
}

/// Retry loop shared by classifier calls: exponential backoff with jitter,
/// terminal errors and the final attempt's error returned as-is.
pub(crate) async fn with_retries<T, F, Fut>(
    config: &ClassifierConfig,
    mut op: F,
) -> Result<T, ClassifierError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ClassifierError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_attempts && e.is_retryable() => {
                let delay = backoff_delay(config.base_delay, attempt)
                    + Duration::from_millis(fastrand::u64(0..250));
                warn!(
                    "Classifier attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, config.max_attempts, e, delay
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// HTTP implementation of [`ReviewClassifier`] over the configured webhook.
pub struct ClassifierClient {
    http: Arc<HttpClient>,
    config: ClassifierConfig,
}

impl ClassifierClient {
    #[must_use]
    pub fn new(http: Arc<HttpClient>, config: ClassifierConfig) -> Self {
        Self { http, config }
    }

    async fn request(&self, body: &Value, ids: &[String]) -> Result<FindingsByReview, ClassifierError> {
        let response = self
            .http
            .post_json(&self.config.webhook_url, body)
            .await
            .map_err(|e| ClassifierError::Transport(format!("{e:#}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Http { status: status.as_u16() });
        }

        let text = response
            .text()
            .await
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(ClassifierError::EmptyBody);
        }

        decode_response(ids, &text)
    }
}

#[async_trait]
impl ReviewClassifier for ClassifierClient {
    async fn classify(&self, reviews: &[ReviewPayload]) -> Result<FindingsByReview, ClassifierError> {
        let ids: Vec<String> = reviews.iter().map(|r| r.id.clone()).collect();
        let body = match reviews {
            [single] => json!({ "review": single }),
            many => json!({ "reviews": many }),
        };

        debug!("Submitting {} review(s) to classifier", reviews.len());
        with_retries(&self.config, |_| self.request(&body, &ids)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn decodes_single_report_envelope() {
        let body = r#"{ "violations": [{ "type": "Policy Violation", "severity": "High", "action": "Remove", "details": "contains a link" }] }"#;
        let decoded = decode_response(&ids(&["R1"]), body).unwrap();
        assert_eq!(decoded["R1"].len(), 1);
        assert_eq!(decoded["R1"][0].violation_type, "Policy Violation");
    }

    #[test]
    fn decodes_results_envelope() {
        let body = r#"{ "results": [
            { "reviewId": "R1", "violations": [{ "type": "Spam" }] },
            { "id": "R2", "violations": [] }
        ] }"#;
        let decoded = decode_response(&ids(&["R1", "R2"]), body).unwrap();
        assert_eq!(decoded["R1"].len(), 1);
        assert!(decoded["R2"].is_empty());
    }

    #[test]
    fn decodes_map_envelope() {
        let body = r#"{ "R1": [{ "type": "Spam", "severity": "Low" }], "R2": [] }"#;
        let decoded = decode_response(&ids(&["R1", "R2"]), body).unwrap();
        assert_eq!(decoded["R1"].len(), 1);
        assert!(decoded["R2"].is_empty());
    }

    #[rstest]
    #[case::array(r#"[1, 2, 3]"#)]
    #[case::scalar(r#"42"#)]
    #[case::unknown_object(r#"{ "verdict": "ok" }"#)]
    fn unknown_shapes_are_rejected(#[case] body: &str) {
        let err = decode_response(&ids(&["R1"]), body).unwrap_err();
        assert!(matches!(err, ClassifierError::UnrecognizedShape));
    }

    #[test]
    fn report_envelope_requires_single_submission() {
        let body = r#"{ "violations": [] }"#;
        let err = decode_response(&ids(&["R1", "R2"]), body).unwrap_err();
        assert!(matches!(err, ClassifierError::UnrecognizedShape));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = decode_response(&ids(&["R1"]), "{ not json").unwrap_err();
        assert!(matches!(err, ClassifierError::Decode(_)));
    }

    #[rstest]
    #[case(1, 1)]
    #[case(2, 2)]
    #[case(3, 4)]
    #[case(4, 8)]
    fn backoff_doubles_per_attempt(#[case] attempt: u32, #[case] expected_secs: u64) {
        assert_eq!(
            backoff_delay(Duration::from_secs(1), attempt),
            Duration::from_secs(expected_secs)
        );
    }

    #[tokio::test]
    async fn exhausting_attempts_surfaces_last_error() {
        let config = ClassifierConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retries(&config, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClassifierError::Http { status: 502 }) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(ClassifierError::Http { status: 502 })));
    }

    #[tokio::test]
    async fn unrecognized_shape_is_not_retried() {
        let config = ClassifierConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retries(&config, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClassifierError::UnrecognizedShape) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ClassifierError::UnrecognizedShape)));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let config = ClassifierConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            ..Default::default()
        };

        let result = with_retries(&config, |attempt| async move {
            if attempt < 3 {
                Err(ClassifierError::EmptyBody)
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn payload_normalizes_review_shape() {
        let mut review = Review::new("R1".into(), "B000TEST01".into(), "Broke in a week".into(), 1);
        review.verified_purchase = true;
        review.helpful_votes = 4;

        let payload = ReviewPayload::from_review(&review);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["id"], "R1");
        assert_eq!(json["helpfulVotes"], 4);
        assert_eq!(json["verified"], true);
    }
}
