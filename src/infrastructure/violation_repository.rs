//! Repository for review violation rows
//!
//! Violation rows are never deleted; the only permitted mutation is setting
//! the override fields. Overridden rows drop out of active-violation counts
//! but stay queryable for audit.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::sync::Arc;

use crate::domain::{ReviewViolation, ViolationFinding};

/// Repository over the `review_violations` table.
#[derive(Clone)]
pub struct ViolationRepository {
    pool: Arc<SqlitePool>,
}

impl ViolationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Persists one review's findings and returns the new row id.
    ///
    /// The denormalized ASIN is taken from the stored review when present,
    /// falling back to the caller-provided one.
    pub async fn record_findings(
        &self,
        review_id: &str,
        asin: &str,
        findings: &[ViolationFinding],
        scanned_at: DateTime<Utc>,
    ) -> Result<i64> {
        let stored_asin: Option<String> =
            sqlx::query_scalar("SELECT asin FROM reviews WHERE review_id = ?")
                .bind(review_id)
                .fetch_optional(&*self.pool)
                .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO review_violations (review_id, asin, findings, scanned_at, overridden)
            VALUES (?, ?, ?, ?, 0)
            "#,
        )
        .bind(review_id)
        .bind(stored_asin.as_deref().unwrap_or(asin))
        .bind(serde_json::to_string(findings)?)
        .bind(scanned_at)
        .execute(&*self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Marks a violation as overridden, recording who dismissed it and when.
    pub async fn override_violation(&self, id: i64, overridden_by: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE review_violations
            SET overridden = 1, overridden_by = ?, overridden_at = ?
            WHERE id = ?
            "#,
        )
        .bind(overridden_by)
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("Violation {id} not found");
        }
        Ok(())
    }

    /// Number of non-overridden violation rows for a product.
    pub async fn active_violation_count(&self, asin: &str) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM review_violations WHERE asin = ? AND overridden = 0",
        )
        .bind(asin)
        .fetch_one(&*self.pool)
        .await?;
        Ok(count)
    }

    /// Number of non-overridden violation rows for a review.
    pub async fn active_violation_count_for_review(&self, review_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM review_violations WHERE review_id = ? AND overridden = 0",
        )
        .bind(review_id)
        .fetch_one(&*self.pool)
        .await?;
        Ok(count)
    }

    /// Get one violation row by id.
    pub async fn get(&self, id: i64) -> Result<Option<ReviewViolation>> {
        let row = sqlx::query(
            r#"
            SELECT id, review_id, asin, findings, scanned_at, overridden, overridden_by,
                   overridden_at
            FROM review_violations WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|row| violation_from_row(&row)))
    }

    /// All violation rows of a product, newest scan first.
    pub async fn list_for_product(&self, asin: &str) -> Result<Vec<ReviewViolation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, review_id, asin, findings, scanned_at, overridden, overridden_by,
                   overridden_at
            FROM review_violations
            WHERE asin = ?
            ORDER BY scanned_at DESC, id DESC
            "#,
        )
        .bind(asin)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.iter().map(violation_from_row).collect())
    }
}

fn violation_from_row(row: &SqliteRow) -> ReviewViolation {
    ReviewViolation {
        id: row.get("id"),
        review_id: row.get("review_id"),
        asin: row.get("asin"),
        findings: serde_json::from_str(&row.get::<String, _>("findings")).unwrap_or_default(),
        scanned_at: row.get("scanned_at"),
        overridden: row.get("overridden"),
        overridden_by: row.get("overridden_by"),
        overridden_at: row.get("overridden_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RecommendedAction, Review, Severity, UserBenefit};
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::product_repository::ProductRepository;

    async fn repositories() -> (ProductRepository, ViolationRepository) {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        (
            ProductRepository::new(db.pool().clone()),
            ViolationRepository::new(db.pool().clone()),
        )
    }

    fn finding() -> ViolationFinding {
        ViolationFinding {
            violation_type: "Content Violation".into(),
            category: Some("Policy Violation".into()),
            severity: Severity::High,
            user_benefit: Some(UserBenefit::Low),
            action: RecommendedAction::Remove,
            details: Some("contains a promotional link".into()),
        }
    }

    #[tokio::test]
    async fn findings_round_trip() {
        let (products, violations) = repositories().await;
        products
            .upsert_review(&Review::new("R1".into(), "B000TEST01".into(), "spam".into(), 1))
            .await
            .unwrap();

        let id = violations
            .record_findings("R1", "B000TEST01", &[finding()], Utc::now())
            .await
            .unwrap();

        let stored = violations.get(id).await.unwrap().unwrap();
        assert_eq!(stored.review_id, "R1");
        assert_eq!(stored.asin, "B000TEST01");
        assert!(!stored.overridden);
        assert_eq!(stored.findings.len(), 1);
        assert_eq!(stored.findings[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn asin_is_taken_from_stored_review() {
        let (products, violations) = repositories().await;
        products
            .upsert_review(&Review::new("R1".into(), "B000TEST01".into(), "spam".into(), 1))
            .await
            .unwrap();

        // Caller passes a stale ASIN; the stored review wins.
        let id = violations
            .record_findings("R1", "B000STALE99", &[finding()], Utc::now())
            .await
            .unwrap();
        assert_eq!(violations.get(id).await.unwrap().unwrap().asin, "B000TEST01");
    }

    #[tokio::test]
    async fn override_excludes_from_active_counts_but_keeps_row() {
        let (products, violations) = repositories().await;
        products
            .upsert_review(&Review::new("R1".into(), "B000TEST01".into(), "spam".into(), 1))
            .await
            .unwrap();
        let id = violations
            .record_findings("R1", "B000TEST01", &[finding()], Utc::now())
            .await
            .unwrap();

        assert_eq!(violations.active_violation_count("B000TEST01").await.unwrap(), 1);

        violations.override_violation(id, "Admin").await.unwrap();

        assert_eq!(violations.active_violation_count("B000TEST01").await.unwrap(), 0);
        assert_eq!(
            violations.active_violation_count_for_review("R1").await.unwrap(),
            0
        );

        let stored = violations.get(id).await.unwrap().unwrap();
        assert!(stored.overridden);
        assert_eq!(stored.overridden_by.as_deref(), Some("Admin"));
        assert!(stored.overridden_at.is_some());
    }

    #[tokio::test]
    async fn override_of_unknown_row_fails() {
        let (_, violations) = repositories().await;
        assert!(violations.override_violation(999, "Admin").await.is_err());
    }
}
