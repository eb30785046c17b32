//! Repository for product and review rows
//!
//! Upserts are keyed on the natural identifiers (ASIN, review id) so that
//! re-ingesting the same result set is idempotent. The derived aggregates
//! (`rating_data`, `review_summary`) and the append-only history rows are
//! maintained here, invoked by ingestion whenever the underlying rows
//! change.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::sync::Arc;

use crate::domain::{
    Product, ProductSnapshot, ProductStatus, RatingData, Review, ReviewSummary, StarBreakdown,
};

/// Repository over the `products`, `reviews` and `product_history` tables.
#[derive(Clone)]
pub struct ProductRepository {
    pool: Arc<SqlitePool>,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    // ===============================
    // PRODUCT OPERATIONS
    // ===============================

    /// Insert or update a product row keyed on its ASIN, appending a history
    /// row when a tracked field changed.
    pub async fn upsert_product(&self, product: &Product, violation_count: i64) -> Result<()> {
        let old = self.get_product(&product.asin).await?;

        sqlx::query(
            r#"
            INSERT INTO products
            (asin, title, brand, price, currency, availability, images, categories, features,
             specifications, best_sellers_rank, variations, rating_data, review_summary, status,
             created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(asin) DO UPDATE SET
                title = excluded.title,
                brand = excluded.brand,
                price = excluded.price,
                currency = excluded.currency,
                availability = excluded.availability,
                images = excluded.images,
                categories = excluded.categories,
                features = excluded.features,
                specifications = excluded.specifications,
                best_sellers_rank = excluded.best_sellers_rank,
                variations = excluded.variations,
                rating_data = COALESCE(excluded.rating_data, products.rating_data),
                review_summary = COALESCE(excluded.review_summary, products.review_summary),
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&product.asin)
        .bind(&product.title)
        .bind(&product.brand)
        .bind(product.price)
        .bind(&product.currency)
        .bind(&product.availability)
        .bind(serde_json::to_string(&product.images)?)
        .bind(serde_json::to_string(&product.categories)?)
        .bind(serde_json::to_string(&product.features)?)
        .bind(serde_json::to_string(&product.specifications)?)
        .bind(serde_json::to_string(&product.best_sellers_rank)?)
        .bind(serde_json::to_string(&product.variations)?)
        .bind(product.rating_data.as_ref().map(serde_json::to_string).transpose()?)
        .bind(product.review_summary.as_ref().map(serde_json::to_string).transpose()?)
        .bind(product.status.as_str())
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&*self.pool)
        .await?;

        // History compares the stored rows, not the incoming value: the
        // upsert may have kept previously derived aggregates.
        if let Some(stored) = self.get_product(&product.asin).await? {
            let new_snapshot = ProductSnapshot::of(&stored, violation_count);
            let changed = old
                .map(|o| ProductSnapshot::of(&o, violation_count))
                .is_none_or(|o| o.differs_from(&new_snapshot));
            if changed {
                self.append_history(&new_snapshot).await?;
            }
        }

        Ok(())
    }

    /// Get product by ASIN
    pub async fn get_product(&self, asin: &str) -> Result<Option<Product>> {
        let row = sqlx::query(
            r#"
            SELECT asin, title, brand, price, currency, availability, images, categories,
                   features, specifications, best_sellers_rank, variations, rating_data,
                   review_summary, status, created_at, updated_at
            FROM products WHERE asin = ?
            "#,
        )
        .bind(asin)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|row| product_from_row(&row)))
    }

    /// Get all products with pagination, most recently updated first
    pub async fn list_products(&self, limit: i64, offset: i64) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            r#"
            SELECT asin, title, brand, price, currency, availability, images, categories,
                   features, specifications, best_sellers_rank, variations, rating_data,
                   review_summary, status, created_at, updated_at
            FROM products
            ORDER BY updated_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.iter().map(product_from_row).collect())
    }

    /// Update only the lifecycle status of a product. A missing row is not
    /// an error: status tracking starts with the first ingested row.
    pub async fn set_status(&self, asin: &str, status: ProductStatus) -> Result<()> {
        sqlx::query("UPDATE products SET status = ?, updated_at = ? WHERE asin = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(asin)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    // ===============================
    // REVIEW OPERATIONS
    // ===============================

    /// Insert or update a review keyed on its review id.
    pub async fn upsert_review(&self, review: &Review) -> Result<()> {
        // Reviews may arrive before their product scrape; keep the parent
        // row present so the foreign key holds.
        sqlx::query(
            r#"
            INSERT INTO products (asin, title, status, created_at, updated_at)
            VALUES (?, ?, 'queued', ?, ?)
            ON CONFLICT(asin) DO NOTHING
            "#,
        )
        .bind(&review.asin)
        .bind(&review.asin)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&*self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO reviews
            (review_id, asin, title, body, rating, author_name, author_id, verified_purchase,
             helpful_votes, total_votes, review_date, variant, country, images,
             created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(review_id) DO UPDATE SET
                asin = excluded.asin,
                title = excluded.title,
                body = excluded.body,
                rating = excluded.rating,
                author_name = excluded.author_name,
                author_id = excluded.author_id,
                verified_purchase = excluded.verified_purchase,
                helpful_votes = excluded.helpful_votes,
                total_votes = excluded.total_votes,
                review_date = excluded.review_date,
                variant = excluded.variant,
                country = excluded.country,
                images = excluded.images,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&review.review_id)
        .bind(&review.asin)
        .bind(&review.title)
        .bind(&review.body)
        .bind(review.rating)
        .bind(&review.author_name)
        .bind(&review.author_id)
        .bind(review.verified_purchase)
        .bind(review.helpful_votes)
        .bind(review.total_votes)
        .bind(review.review_date)
        .bind(&review.variant)
        .bind(&review.country)
        .bind(serde_json::to_string(&review.images)?)
        .bind(review.created_at)
        .bind(review.updated_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// All reviews of a product, newest first.
    pub async fn get_reviews(&self, asin: &str) -> Result<Vec<Review>> {
        let rows = sqlx::query(
            r#"
            SELECT review_id, asin, title, body, rating, author_name, author_id,
                   verified_purchase, helpful_votes, total_votes, review_date, variant,
                   country, images, created_at, updated_at
            FROM reviews
            WHERE asin = ?
            ORDER BY review_date DESC
            "#,
        )
        .bind(asin)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.iter().map(review_from_row).collect())
    }

    pub async fn count_reviews(&self, asin: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE asin = ?")
            .bind(asin)
            .fetch_one(&*self.pool)
            .await?;
        Ok(count)
    }

    // ===============================
    // DERIVED AGGREGATES & HISTORY
    // ===============================

    /// Recompute `rating_data` and `review_summary` from the stored review
    /// set, appending a history row when the tracked values changed.
    pub async fn recompute_aggregates(&self, asin: &str, violation_count: i64) -> Result<()> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS review_count,
                   AVG(rating) AS avg_rating,
                   COALESCE(SUM(CASE WHEN rating = 5 THEN 1 ELSE 0 END), 0) AS five_star,
                   COALESCE(SUM(CASE WHEN rating = 4 THEN 1 ELSE 0 END), 0) AS four_star,
                   COALESCE(SUM(CASE WHEN rating = 3 THEN 1 ELSE 0 END), 0) AS three_star,
                   COALESCE(SUM(CASE WHEN rating = 2 THEN 1 ELSE 0 END), 0) AS two_star,
                   COALESCE(SUM(CASE WHEN rating = 1 THEN 1 ELSE 0 END), 0) AS one_star,
                   COALESCE(SUM(CASE WHEN verified_purchase THEN 1 ELSE 0 END), 0) AS verified
            FROM reviews WHERE asin = ?
            "#,
        )
        .bind(asin)
        .fetch_one(&*self.pool)
        .await?;

        let review_count: i64 = row.get("review_count");
        if review_count == 0 {
            return Ok(());
        }

        let old = self.get_product(asin).await?;
        let total = review_count as f64;
        let now = Utc::now();

        let rating_data = RatingData {
            rating: row.get::<f64, _>("avg_rating"),
            review_count,
            star_breakdown: StarBreakdown {
                five_star: row.get::<i64, _>("five_star") as f64 / total,
                four_star: row.get::<i64, _>("four_star") as f64 / total,
                three_star: row.get::<i64, _>("three_star") as f64 / total,
                two_star: row.get::<i64, _>("two_star") as f64 / total,
                one_star: row.get::<i64, _>("one_star") as f64 / total,
            },
            last_updated: now,
        };
        let review_summary = ReviewSummary {
            verified_purchase_count: row.get("verified"),
            last_updated: now,
        };

        sqlx::query(
            "UPDATE products SET rating_data = ?, review_summary = ?, updated_at = ? WHERE asin = ?",
        )
        .bind(serde_json::to_string(&rating_data)?)
        .bind(serde_json::to_string(&review_summary)?)
        .bind(now)
        .bind(asin)
        .execute(&*self.pool)
        .await?;

        if let Some(stored) = self.get_product(asin).await? {
            let new_snapshot = ProductSnapshot::of(&stored, violation_count);
            let changed = old
                .map(|o| ProductSnapshot::of(&o, violation_count))
                .is_none_or(|o| o.differs_from(&new_snapshot));
            if changed {
                self.append_history(&new_snapshot).await?;
            }
        }

        Ok(())
    }

    async fn append_history(&self, snapshot: &ProductSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO product_history
            (asin, price, rating, review_count, best_sellers_rank, violation_count, captured_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.asin)
        .bind(snapshot.price)
        .bind(snapshot.rating)
        .bind(snapshot.review_count)
        .bind(snapshot.best_sellers_rank)
        .bind(snapshot.violation_count)
        .bind(snapshot.captured_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// History rows of a product, oldest first.
    pub async fn history(&self, asin: &str) -> Result<Vec<ProductSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT asin, price, rating, review_count, best_sellers_rank, violation_count,
                   captured_at
            FROM product_history
            WHERE asin = ?
            ORDER BY captured_at ASC, id ASC
            "#,
        )
        .bind(asin)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ProductSnapshot {
                asin: row.get("asin"),
                price: row.get("price"),
                rating: row.get("rating"),
                review_count: row.get("review_count"),
                best_sellers_rank: row.get("best_sellers_rank"),
                violation_count: row.get("violation_count"),
                captured_at: row.get("captured_at"),
            })
            .collect())
    }
}

fn product_from_row(row: &SqliteRow) -> Product {
    Product {
        asin: row.get("asin"),
        title: row.get("title"),
        brand: row.get("brand"),
        price: row.get("price"),
        currency: row.get("currency"),
        availability: row.get("availability"),
        images: json_column(row, "images"),
        categories: json_column(row, "categories"),
        features: json_column(row, "features"),
        specifications: json_column(row, "specifications"),
        best_sellers_rank: json_column(row, "best_sellers_rank"),
        variations: json_column(row, "variations"),
        rating_data: optional_json_column(row, "rating_data"),
        review_summary: optional_json_column(row, "review_summary"),
        status: ProductStatus::parse(row.get::<String, _>("status").as_str()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn review_from_row(row: &SqliteRow) -> Review {
    Review {
        review_id: row.get("review_id"),
        asin: row.get("asin"),
        title: row.get("title"),
        body: row.get("body"),
        rating: row.get("rating"),
        author_name: row.get("author_name"),
        author_id: row.get("author_id"),
        verified_purchase: row.get("verified_purchase"),
        helpful_votes: row.get("helpful_votes"),
        total_votes: row.get("total_votes"),
        review_date: row.get("review_date"),
        variant: row.get("variant"),
        country: row.get("country"),
        images: json_column(row, "images"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn json_column<T: serde::de::DeserializeOwned + Default>(row: &SqliteRow, column: &str) -> T {
    serde_json::from_str(&row.get::<String, _>(column)).unwrap_or_default()
}

fn optional_json_column<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Option<T> {
    row.get::<Option<String>, _>(column)
        .and_then(|raw| serde_json::from_str(&raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;

    async fn repository() -> ProductRepository {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        ProductRepository::new(db.pool().clone())
    }

    fn product(asin: &str) -> Product {
        let mut product = Product::new(asin.into(), "Stainless Kettle".into());
        product.brand = Some("Acme".into());
        product.price = Some(24.99);
        product.currency = Some("USD".into());
        product
    }

    #[tokio::test]
    async fn upsert_and_fetch_round_trip() {
        let repo = repository().await;
        repo.upsert_product(&product("B000TEST01"), 0).await.unwrap();

        let stored = repo.get_product("B000TEST01").await.unwrap().unwrap();
        assert_eq!(stored.title, "Stainless Kettle");
        assert_eq!(stored.price, Some(24.99));
        assert_eq!(stored.status, ProductStatus::Active);
    }

    #[tokio::test]
    async fn set_status_tolerates_missing_row() {
        let repo = repository().await;
        repo.set_status("B000MISSING", ProductStatus::Queued).await.unwrap();
    }

    #[tokio::test]
    async fn review_upsert_creates_parent_stub() {
        let repo = repository().await;
        let review = Review::new("R1".into(), "B000TEST01".into(), "Great".into(), 5);
        repo.upsert_review(&review).await.unwrap();

        let stub = repo.get_product("B000TEST01").await.unwrap().unwrap();
        assert_eq!(stub.status, ProductStatus::Queued);
        assert_eq!(repo.count_reviews("B000TEST01").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn aggregates_are_recomputed_from_reviews() {
        let repo = repository().await;
        repo.upsert_product(&product("B000TEST01"), 0).await.unwrap();

        let mut five = Review::new("R1".into(), "B000TEST01".into(), "Great".into(), 5);
        five.verified_purchase = true;
        repo.upsert_review(&five).await.unwrap();
        repo.upsert_review(&Review::new("R2".into(), "B000TEST01".into(), "Poor".into(), 1))
            .await
            .unwrap();

        repo.recompute_aggregates("B000TEST01", 0).await.unwrap();

        let stored = repo.get_product("B000TEST01").await.unwrap().unwrap();
        let rating = stored.rating_data.unwrap();
        assert_eq!(rating.review_count, 2);
        assert!((rating.rating - 3.0).abs() < f64::EPSILON);
        assert!((rating.star_breakdown.five_star - 0.5).abs() < f64::EPSILON);
        assert_eq!(stored.review_summary.unwrap().verified_purchase_count, 1);
    }

    #[tokio::test]
    async fn history_rows_append_only_on_change() {
        let repo = repository().await;
        let mut item = product("B000TEST01");

        repo.upsert_product(&item, 0).await.unwrap();
        assert_eq!(repo.history("B000TEST01").await.unwrap().len(), 1);

        // Unchanged tracked fields: no new row.
        repo.upsert_product(&item, 0).await.unwrap();
        assert_eq!(repo.history("B000TEST01").await.unwrap().len(), 1);

        item.price = Some(19.99);
        repo.upsert_product(&item, 0).await.unwrap();
        let history = repo.history("B000TEST01").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].price, Some(19.99));
    }
}
