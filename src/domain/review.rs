use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Customer review row; `review_id` is the source-provided globally unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub review_id: String,
    pub asin: String,
    pub title: Option<String>,
    pub body: String,
    pub rating: i32,
    pub author_name: Option<String>,
    pub author_id: Option<String>,
    pub verified_purchase: bool,
    pub helpful_votes: i64,
    pub total_votes: i64,
    pub review_date: Option<DateTime<Utc>>,
    pub variant: Option<String>,
    pub country: Option<String>,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Review {
    /// Creates a review with only the required fields populated.
    #[must_use]
    pub fn new(review_id: String, asin: String, body: String, rating: i32) -> Self {
        let now = Utc::now();
        Self {
            review_id,
            asin,
            title: None,
            body,
            rating,
            author_name: None,
            author_id: None,
            verified_purchase: false,
            helpful_votes: 0,
            total_votes: 0,
            review_date: None,
            variant: None,
            country: None,
            images: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this review may be submitted to the violation classifier.
    ///
    /// Reviews with a blank identifier or whitespace-only body are excluded
    /// from submission and from scan result sets.
    #[must_use]
    pub fn is_scannable(&self) -> bool {
        !self.review_id.trim().is_empty() && !self.body.trim().is_empty()
    }
}
