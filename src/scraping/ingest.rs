//! # Result Ingestion
//!
//! Maps raw provider result items onto the internal row schema and upserts
//! them by natural key (ASIN for products, review id for reviews).
//! Ingestion is idempotent: re-running it for the same result set overwrites
//! identical rows without duplication.
//!
//! Malformed items are logged and skipped (validation errors are not
//! retried); a row-level write failure aborts the enclosing task, leaving
//! earlier upserts committed.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{
    BestSellersRank, Product, ProductStatus, ProductVariation, RatingData, Review, StarBreakdown,
};
use crate::infrastructure::product_repository::ProductRepository;
use crate::infrastructure::violation_repository::ViolationRepository;
use crate::scraping::tasks::ScrapeKind;

/// Outcome counters for one ingestion pass.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub products_upserted: usize,
    pub reviews_upserted: usize,
    pub skipped: usize,
    /// Distinct ASINs touched by this pass, in first-seen order.
    pub product_asins: Vec<String>,
}

/// Transforms raw provider items into store rows.
pub struct ResultIngestor {
    products: Arc<ProductRepository>,
    violations: Arc<ViolationRepository>,
}

impl ResultIngestor {
    #[must_use]
    pub fn new(products: Arc<ProductRepository>, violations: Arc<ViolationRepository>) -> Self {
        Self { products, violations }
    }

    /// Ingests one result set. The caller has already verified it is a
    /// non-empty array.
    pub async fn ingest(&self, kind: ScrapeKind, items: &[Value]) -> Result<IngestReport> {
        match kind {
            ScrapeKind::Product => self.ingest_products(items).await,
            ScrapeKind::Review => self.ingest_reviews(items).await,
        }
    }

    async fn ingest_products(&self, items: &[Value]) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for item in items {
            let Some(product) = map_product(item) else {
                warn!("Skipping malformed product item: missing asin or title");
                report.skipped += 1;
                continue;
            };

            let violation_count = self
                .violations
                .active_violation_count(&product.asin)
                .await
                .unwrap_or(0);

            self.products
                .upsert_product(&product, violation_count)
                .await
                .with_context(|| format!("Failed to upsert product {}", product.asin))?;

            debug!("Upserted product {}", product.asin);
            report.products_upserted += 1;
            if !report.product_asins.contains(&product.asin) {
                report.product_asins.push(product.asin);
            }
        }

        Ok(report)
    }

    async fn ingest_reviews(&self, items: &[Value]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut touched: BTreeSet<String> = BTreeSet::new();

        for item in items {
            let Some(review) = map_review(item) else {
                warn!("Skipping malformed review item: missing review id, asin or rating");
                report.skipped += 1;
                continue;
            };

            self.products
                .upsert_review(&review)
                .await
                .with_context(|| format!("Failed to upsert review {}", review.review_id))?;

            report.reviews_upserted += 1;
            touched.insert(review.asin);
        }

        // The review set changed: recompute the derived aggregates.
        for asin in touched {
            let violation_count = self.violations.active_violation_count(&asin).await.unwrap_or(0);
            self.products
                .recompute_aggregates(&asin, violation_count)
                .await
                .with_context(|| format!("Failed to recompute aggregates for {asin}"))?;
            if !report.product_asins.contains(&asin) {
                report.product_asins.push(asin);
            }
        }

        Ok(report)
    }
}

/// Maps one raw provider product item onto a [`Product`] row.
///
/// Returns `None` when the item is missing its natural key or title.
#[must_use]
pub fn map_product(item: &Value) -> Option<Product> {
    let asin = str_of(item, &["asin"])?;
    let title = str_of(item, &["title", "name"])?;

    let mut product = Product::new(asin, title);
    product.brand = str_of(item, &["brand", "manufacturer"]);

    // Nested price objects are flattened onto the row.
    if let Some(price) = item.get("price") {
        if price.is_object() {
            product.price = f64_of(price, &["value", "amount"]);
            product.currency = str_of(price, &["currency"]);
        } else {
            product.price = price.as_f64();
        }
    }
    if product.currency.is_none() {
        product.currency = str_of(item, &["currency"]);
    }

    product.availability = str_of(item, &["availability", "inStockText"]);
    product.images = str_vec(item, &["images", "imageUrlList"]);
    product.categories = name_vec(item, &["categories", "breadCrumbs"]);
    product.features = str_vec(item, &["features", "bulletPoints"]);
    product.specifications = spec_map(item);
    product.best_sellers_rank = rank_vec(item);
    product.variations = variation_vec(item);

    // Seed the rating aggregate from the feed; review ingestion recomputes
    // it from the stored review set afterwards.
    if let Some(rating) = f64_of(item, &["stars", "rating"]) {
        product.rating_data = Some(RatingData {
            rating,
            review_count: i64_of(item, &["reviewsCount", "countReview", "reviewCount"])
                .unwrap_or(0),
            star_breakdown: star_breakdown(item.get("starsBreakdown")),
            last_updated: Utc::now(),
        });
    }

    product.status = ProductStatus::Active;
    Some(product)
}

/// Maps one raw provider review item onto a [`Review`] row.
///
/// Returns `None` when the item is missing its id, parent ASIN or rating.
#[must_use]
pub fn map_review(item: &Value) -> Option<Review> {
    let review_id = str_of(item, &["reviewId", "id"])?;
    let asin = str_of(item, &["asin"]).or_else(|| {
        item.get("product").and_then(|p| str_of(p, &["asin"]))
    })?;
    let rating = f64_of(item, &["ratingScore", "rating", "stars"])?;
    let rating = (rating.round() as i32).clamp(1, 5);

    let body = str_of(item, &["reviewDescription", "text", "body"]).unwrap_or_default();
    let mut review = Review::new(review_id, asin, body, rating);

    review.title = str_of(item, &["reviewTitle", "title"]);
    review.author_name = str_of(item, &["userProfileName", "authorName", "author"]);
    review.author_id = str_of(item, &["userId", "authorId"]);
    review.verified_purchase = bool_of(item, &["isVerified", "verified", "verifiedPurchase"]);
    review.helpful_votes = i64_of(item, &["reviewReaction", "helpfulVotes", "helpful"]).unwrap_or(0);
    review.total_votes = i64_of(item, &["totalVotes", "totalReactions"]).unwrap_or(0);
    review.review_date = str_of(item, &["date", "reviewDate"]).and_then(|s| parse_date(&s));
    review.variant = str_of(item, &["variant", "variantAttributes"]);
    review.country = str_of(item, &["countryCode", "country"]);
    review.images = str_vec(item, &["reviewImages", "images"]);

    Some(review)
}

fn str_of(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| item.get(*k))
        .find_map(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn f64_of(item: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().filter_map(|k| item.get(*k)).find_map(|v| {
        v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    })
}

fn i64_of(item: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().filter_map(|k| item.get(*k)).find_map(|v| {
        v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    })
}

fn bool_of(item: &Value, keys: &[&str]) -> bool {
    keys.iter()
        .filter_map(|k| item.get(*k))
        .find_map(Value::as_bool)
        .unwrap_or(false)
}

fn str_vec(item: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter_map(|k| item.get(*k))
        .find_map(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Accepts either an array of strings or an array of `{ "name": ... }`.
fn name_vec(item: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter_map(|k| item.get(*k))
        .find_map(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| {
                    v.as_str()
                        .map(ToString::to_string)
                        .or_else(|| str_of(v, &["name"]))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Accepts either an object map or an array of `{ "name", "value" }`.
fn spec_map(item: &Value) -> HashMap<String, String> {
    let Some(specs) = item.get("specifications").or_else(|| item.get("attributes")) else {
        return HashMap::new();
    };
    match specs {
        Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
        Value::Array(arr) => arr
            .iter()
            .filter_map(|entry| {
                Some((str_of(entry, &["name", "key"])?, str_of(entry, &["value"])?))
            })
            .collect(),
        _ => HashMap::new(),
    }
}

fn rank_vec(item: &Value) -> Vec<BestSellersRank> {
    item.get("bestSellersRank")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|entry| {
                    Some(BestSellersRank {
                        category: str_of(entry, &["category", "name"])?,
                        rank: i64_of(entry, &["rank", "position"])?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn variation_vec(item: &Value) -> Vec<ProductVariation> {
    item.get("variations")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|entry| {
                    let asin = str_of(entry, &["asin"])?;
                    let attributes = entry
                        .get("attributes")
                        .and_then(Value::as_object)
                        .map(|map| {
                            map.iter()
                                .filter_map(|(k, v)| {
                                    v.as_str().map(|s| (k.clone(), s.to_string()))
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    Some(ProductVariation { asin, attributes })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Normalizes a star-breakdown value to a fraction in `0.0..=1.0`.
///
/// Accepts fractions (`0.6`), percents (`60`) and percent strings (`"60%"`).
fn fraction(value: &Value) -> f64 {
    let raw = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().trim_end_matches('%').parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if raw > 1.0 { raw / 100.0 } else { raw }
}

fn star_breakdown(value: Option<&Value>) -> StarBreakdown {
    let Some(map) = value else {
        return StarBreakdown::default();
    };
    StarBreakdown {
        five_star: map.get("5star").or_else(|| map.get("5")).map(fraction).unwrap_or(0.0),
        four_star: map.get("4star").or_else(|| map.get("4")).map(fraction).unwrap_or(0.0),
        three_star: map.get("3star").or_else(|| map.get("3")).map(fraction).unwrap_or(0.0),
        two_star: map.get("2star").or_else(|| map.get("2")).map(fraction).unwrap_or(0.0),
        one_star: map.get("1star").or_else(|| map.get("1")).map(fraction).unwrap_or(0.0),
    }
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
