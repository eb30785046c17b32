use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::product::Product;

/// Append-only snapshot of a product's tracked fields.
///
/// One row is written whenever a tracked field differs from the previous
/// stored product row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub asin: String,
    pub price: Option<f64>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub best_sellers_rank: Option<i64>,
    pub violation_count: i64,
    pub captured_at: DateTime<Utc>,
}

impl ProductSnapshot {
    /// Captures the tracked fields of a product row.
    #[must_use]
    pub fn of(product: &Product, violation_count: i64) -> Self {
        Self {
            asin: product.asin.clone(),
            price: product.price,
            rating: product.rating_data.as_ref().map(|r| r.rating),
            review_count: product.rating_data.as_ref().map(|r| r.review_count),
            best_sellers_rank: product.primary_rank(),
            violation_count,
            captured_at: Utc::now(),
        }
    }

    /// Whether any tracked field differs from `other` (capture time ignored).
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> bool {
        self.price != other.price
            || self.rating != other.rating
            || self.review_count != other.review_count
            || self.best_sellers_rank != other.best_sellers_rank
            || self.violation_count != other.violation_count
    }
}
