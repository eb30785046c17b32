// Database connection and pool management
// This module handles SQLite database connections using sqlx

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create database file directory if it doesn't exist
        let db_path = if database_url.starts_with("sqlite://") {
            database_url.trim_start_matches("sqlite://")
        } else if database_url.starts_with("sqlite:") {
            database_url.trim_start_matches("sqlite:")
        } else {
            database_url
        };

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            // Ensure the database file exists by creating it if necessary
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_products_sql = r#"
            CREATE TABLE IF NOT EXISTS products (
                asin TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                brand TEXT,
                price REAL,
                currency TEXT,
                availability TEXT,
                images TEXT NOT NULL DEFAULT '[]',
                categories TEXT NOT NULL DEFAULT '[]',
                features TEXT NOT NULL DEFAULT '[]',
                specifications TEXT NOT NULL DEFAULT '{}',
                best_sellers_rank TEXT NOT NULL DEFAULT '[]',
                variations TEXT NOT NULL DEFAULT '[]',
                rating_data TEXT,
                review_summary TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
        "#;

        let create_reviews_sql = r#"
            CREATE TABLE IF NOT EXISTS reviews (
                review_id TEXT PRIMARY KEY,
                asin TEXT NOT NULL,
                title TEXT,
                body TEXT NOT NULL DEFAULT '',
                rating INTEGER NOT NULL,
                author_name TEXT,
                author_id TEXT,
                verified_purchase BOOLEAN NOT NULL DEFAULT 0,
                helpful_votes INTEGER NOT NULL DEFAULT 0,
                total_votes INTEGER NOT NULL DEFAULT 0,
                review_date DATETIME,
                variant TEXT,
                country TEXT,
                images TEXT NOT NULL DEFAULT '[]',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (asin) REFERENCES products (asin) ON DELETE CASCADE
            )
        "#;

        let create_violations_sql = r#"
            CREATE TABLE IF NOT EXISTS review_violations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                review_id TEXT NOT NULL,
                asin TEXT NOT NULL,
                findings TEXT NOT NULL,
                scanned_at DATETIME NOT NULL,
                overridden BOOLEAN NOT NULL DEFAULT 0,
                overridden_by TEXT,
                overridden_at DATETIME,
                FOREIGN KEY (review_id) REFERENCES reviews (review_id) ON DELETE CASCADE
            )
        "#;

        let create_history_sql = r#"
            CREATE TABLE IF NOT EXISTS product_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                asin TEXT NOT NULL,
                price REAL,
                rating REAL,
                review_count INTEGER,
                best_sellers_rank INTEGER,
                violation_count INTEGER NOT NULL DEFAULT 0,
                captured_at DATETIME NOT NULL,
                FOREIGN KEY (asin) REFERENCES products (asin) ON DELETE CASCADE
            )
        "#;

        let create_indexes_sql = [
            "CREATE INDEX IF NOT EXISTS idx_reviews_asin ON reviews (asin)",
            "CREATE INDEX IF NOT EXISTS idx_violations_asin ON review_violations (asin)",
            "CREATE INDEX IF NOT EXISTS idx_violations_review_id ON review_violations (review_id)",
            "CREATE INDEX IF NOT EXISTS idx_history_asin ON product_history (asin)",
            "CREATE INDEX IF NOT EXISTS idx_history_captured_at ON product_history (captured_at)",
        ];

        sqlx::query(create_products_sql).execute(&self.pool).await?;
        sqlx::query(create_reviews_sql).execute(&self.pool).await?;
        sqlx::query(create_violations_sql).execute(&self.pool).await?;
        sqlx::query(create_history_sql).execute(&self.pool).await?;
        for sql in create_indexes_sql {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        tracing::info!("Database schema is up to date");
        Ok(())
    }
}
