use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a monitored product row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Queued,
    Refreshing,
    Error,
}

impl ProductStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Queued => "queued",
            Self::Refreshing => "refreshing",
            Self::Error => "error",
        }
    }

    /// Parses a stored status string, falling back to `Active` for values
    /// written by older schema versions.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "queued" => Self::Queued,
            "refreshing" => Self::Refreshing,
            "error" => Self::Error,
            _ => Self::Active,
        }
    }
}

/// Star-rating distribution as fractions in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StarBreakdown {
    #[serde(rename = "5star")]
    pub five_star: f64,
    #[serde(rename = "4star")]
    pub four_star: f64,
    #[serde(rename = "3star")]
    pub three_star: f64,
    #[serde(rename = "2star")]
    pub two_star: f64,
    #[serde(rename = "1star")]
    pub one_star: f64,
}

/// Aggregate rating block derived from the review set.
///
/// Never hand-edited: recomputed whenever the associated review set changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingData {
    pub rating: f64,
    pub review_count: i64,
    pub star_breakdown: StarBreakdown,
    pub last_updated: DateTime<Utc>,
}

/// Derived review summary stored alongside the rating aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub verified_purchase_count: i64,
    pub last_updated: DateTime<Utc>,
}

/// One best-sellers rank entry (category + position).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestSellersRank {
    pub category: String,
    pub rank: i64,
}

/// A product variation (child ASIN plus its distinguishing attributes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVariation {
    pub asin: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Monitored product row keyed by ASIN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub asin: String,
    pub title: String,
    pub brand: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub availability: Option<String>,
    pub images: Vec<String>,
    pub categories: Vec<String>,
    pub features: Vec<String>,
    pub specifications: HashMap<String, String>,
    pub best_sellers_rank: Vec<BestSellersRank>,
    pub variations: Vec<ProductVariation>,
    pub rating_data: Option<RatingData>,
    pub review_summary: Option<ReviewSummary>,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Creates a product with only the required fields populated.
    #[must_use]
    pub fn new(asin: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            asin,
            title,
            brand: None,
            price: None,
            currency: None,
            availability: None,
            images: Vec::new(),
            categories: Vec::new(),
            features: Vec::new(),
            specifications: HashMap::new(),
            best_sellers_rank: Vec::new(),
            variations: Vec::new(),
            rating_data: None,
            review_summary: None,
            status: ProductStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Top-ranked best-sellers entry, used for history tracking.
    #[must_use]
    pub fn primary_rank(&self) -> Option<i64> {
        self.best_sellers_rank.first().map(|r| r.rank)
    }
}
