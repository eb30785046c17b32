//! End-to-end ingestion tests: natural-key upsert idempotence, aggregate
//! recomputation, and the product -> review chaining scenario.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use review_sentinel::domain::ProductStatus;
use review_sentinel::infrastructure::database_connection::DatabaseConnection;
use review_sentinel::infrastructure::product_repository::ProductRepository;
use review_sentinel::infrastructure::violation_repository::ViolationRepository;
use review_sentinel::scraping::ingest::ResultIngestor;
use review_sentinel::scraping::orchestrator::{OrchestratorConfig, ScrapeOrchestrator};
use review_sentinel::scraping::tasks::{RunStatus, ScrapeKind, ScrapeTaskStatus};
use review_sentinel::scraping::{RunStatusReport, ScrapeProvider};

async fn stack() -> (Arc<ProductRepository>, Arc<ViolationRepository>, Arc<ResultIngestor>) {
    let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    let products = Arc::new(ProductRepository::new(db.pool().clone()));
    let violations = Arc::new(ViolationRepository::new(db.pool().clone()));
    let ingestor = Arc::new(ResultIngestor::new(Arc::clone(&products), Arc::clone(&violations)));
    (products, violations, ingestor)
}

fn product_item(asin: &str, price: f64) -> Value {
    json!({
        "asin": asin,
        "title": "Stainless Kettle",
        "brand": "Acme",
        "price": { "value": price, "currency": "USD" },
        "stars": 4.2,
        "reviewsCount": 128,
        "starsBreakdown": { "5star": "55%", "4star": 0.25, "3star": 10, "2star": 0.05, "1star": 0.05 }
    })
}

fn review_item(review_id: &str, asin: &str, rating: i64) -> Value {
    json!({
        "reviewId": review_id,
        "asin": asin,
        "ratingScore": rating,
        "reviewTitle": "Does the job",
        "reviewDescription": "Boils fast and stays cool to the touch",
        "isVerified": true,
        "date": "2026-05-14"
    })
}

#[tokio::test]
async fn reingesting_products_does_not_duplicate_rows() {
    let (products, _, ingestor) = stack().await;
    let items = vec![product_item("B000TEST01", 24.99)];

    ingestor.ingest(ScrapeKind::Product, &items).await.unwrap();
    ingestor.ingest(ScrapeKind::Product, &items).await.unwrap();

    let all = products.list_products(10, 0).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].asin, "B000TEST01");

    // Identical tracked fields: the second pass appends no history row.
    assert_eq!(products.history("B000TEST01").await.unwrap().len(), 1);
}

#[tokio::test]
async fn reingesting_reviews_does_not_duplicate_rows() {
    let (products, _, ingestor) = stack().await;
    let items = vec![
        review_item("R1", "B000TEST01", 5),
        review_item("R2", "B000TEST01", 3),
    ];

    ingestor.ingest(ScrapeKind::Review, &items).await.unwrap();
    ingestor.ingest(ScrapeKind::Review, &items).await.unwrap();

    assert_eq!(products.count_reviews("B000TEST01").await.unwrap(), 2);

    let stored = products.get_product("B000TEST01").await.unwrap().unwrap();
    let rating = stored.rating_data.unwrap();
    assert_eq!(rating.review_count, 2);
    assert!((rating.rating - 4.0).abs() < f64::EPSILON);
    assert_eq!(stored.review_summary.unwrap().verified_purchase_count, 2);
}

#[tokio::test]
async fn malformed_items_are_skipped_not_fatal() {
    let (products, _, ingestor) = stack().await;
    let items = vec![
        json!({ "title": "missing asin" }),
        product_item("B000TEST01", 24.99),
    ];

    let report = ingestor.ingest(ScrapeKind::Product, &items).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.products_upserted, 1);
    assert!(products.get_product("B000TEST01").await.unwrap().is_some());
}

#[tokio::test]
async fn price_change_appends_history_row() {
    let (products, _, ingestor) = stack().await;

    ingestor
        .ingest(ScrapeKind::Product, &[product_item("B000TEST01", 24.99)])
        .await
        .unwrap();
    ingestor
        .ingest(ScrapeKind::Product, &[product_item("B000TEST01", 19.99)])
        .await
        .unwrap();

    let history = products.history("B000TEST01").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].price, Some(24.99));
    assert_eq!(history[1].price, Some(19.99));
}

/// Scripted provider: every run succeeds on the first poll; product runs
/// serve one product item, review runs one review item.
struct ScriptedProvider;

#[async_trait]
impl ScrapeProvider for ScriptedProvider {
    async fn start_run(&self, kind: ScrapeKind, _targets: &[String]) -> anyhow::Result<String> {
        Ok(match kind {
            ScrapeKind::Product => "run-product".to_string(),
            ScrapeKind::Review => "run-review".to_string(),
        })
    }

    async fn run_status(&self, _run_id: &str) -> anyhow::Result<RunStatusReport> {
        Ok(RunStatusReport { status: RunStatus::Succeeded, progress: Some(100) })
    }

    async fn dataset_items(&self, run_id: &str) -> anyhow::Result<Vec<Value>> {
        Ok(match run_id {
            "run-product" => vec![product_item("B000TEST01", 24.99)],
            _ => vec![review_item("R1", "B000TEST01", 5)],
        })
    }

    async fn run_sync(&self, kind: ScrapeKind, _targets: &[String]) -> anyhow::Result<Vec<Value>> {
        Ok(match kind {
            ScrapeKind::Product => vec![product_item("B000TEST01", 24.99)],
            ScrapeKind::Review => vec![review_item("R1", "B000TEST01", 5)],
        })
    }
}

/// Provider whose runs always report failure.
struct FailingProvider;

#[async_trait]
impl ScrapeProvider for FailingProvider {
    async fn start_run(&self, _kind: ScrapeKind, _targets: &[String]) -> anyhow::Result<String> {
        Ok("run-doomed".to_string())
    }

    async fn run_status(&self, _run_id: &str) -> anyhow::Result<RunStatusReport> {
        Ok(RunStatusReport { status: RunStatus::Failed, progress: None })
    }

    async fn dataset_items(&self, _run_id: &str) -> anyhow::Result<Vec<Value>> {
        anyhow::bail!("no dataset for a failed run")
    }

    async fn run_sync(&self, _kind: ScrapeKind, _targets: &[String]) -> anyhow::Result<Vec<Value>> {
        anyhow::bail!("run-sync unavailable")
    }
}

fn fast_config(chain: bool) -> OrchestratorConfig {
    OrchestratorConfig {
        poll_interval: Duration::from_millis(10),
        max_poll_attempts: 5,
        max_poll_duration: Duration::from_secs(2),
        chain_review_scrape: chain,
        use_run_sync: false,
        auto_scan: false,
    }
}

#[tokio::test]
async fn product_scrape_ingests_and_chains_review_scrape() {
    let (products, violations, _) = stack().await;
    let ingestor = Arc::new(ResultIngestor::new(Arc::clone(&products), Arc::clone(&violations)));
    let orchestrator = ScrapeOrchestrator::new(
        Arc::new(ScriptedProvider),
        ingestor,
        Arc::clone(&products),
        fast_config(true),
    );

    let task_id = orchestrator
        .execute(ScrapeKind::Product, vec!["B000TEST01".to_string()])
        .await
        .unwrap();

    let task = orchestrator.task(task_id).await.unwrap();
    assert_eq!(task.status, ScrapeTaskStatus::Completed);

    let product = products.get_product("B000TEST01").await.unwrap().unwrap();
    assert_eq!(product.status, ProductStatus::Active);

    // The chained review scrape runs in the background.
    for _ in 0..100 {
        if products.count_reviews("B000TEST01").await.unwrap() == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("chained review scrape did not ingest any review");
}

#[tokio::test]
async fn chaining_disabled_leaves_reviews_alone() {
    let (products, violations, _) = stack().await;
    let ingestor = Arc::new(ResultIngestor::new(Arc::clone(&products), Arc::clone(&violations)));
    let orchestrator = ScrapeOrchestrator::new(
        Arc::new(ScriptedProvider),
        ingestor,
        Arc::clone(&products),
        fast_config(false),
    );

    orchestrator
        .execute(ScrapeKind::Product, vec!["B000TEST01".to_string()])
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(products.count_reviews("B000TEST01").await.unwrap(), 0);
}

#[tokio::test]
async fn provider_failure_marks_task_and_product() {
    let (products, violations, _) = stack().await;
    let ingestor = Arc::new(ResultIngestor::new(Arc::clone(&products), Arc::clone(&violations)));
    let orchestrator = ScrapeOrchestrator::new(
        Arc::new(FailingProvider),
        ingestor,
        Arc::clone(&products),
        fast_config(false),
    );

    // Seed a row so the status transition is observable.
    products
        .upsert_review(&review_sentinel::domain::Review::new(
            "R0".into(),
            "B000TEST01".into(),
            "old".into(),
            3,
        ))
        .await
        .unwrap();

    let err = orchestrator
        .execute(ScrapeKind::Product, vec!["B000TEST01".to_string()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed"));

    let tasks = orchestrator.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, ScrapeTaskStatus::Failed);
    assert!(tasks[0].error.is_some());

    let product = products.get_product("B000TEST01").await.unwrap().unwrap();
    assert_eq!(product.status, ProductStatus::Error);
}

#[tokio::test]
async fn start_product_scrape_returns_immediately_and_completes_in_background() {
    let (products, violations, _) = stack().await;
    let ingestor = Arc::new(ResultIngestor::new(Arc::clone(&products), Arc::clone(&violations)));
    let orchestrator = ScrapeOrchestrator::new(
        Arc::new(ScriptedProvider),
        ingestor,
        Arc::clone(&products),
        fast_config(false),
    );

    let task_id = orchestrator
        .start_product_scrape(vec!["B000TEST01".to_string()])
        .await
        .unwrap();

    for _ in 0..100 {
        if let Some(task) = orchestrator.task(task_id).await {
            if task.status == ScrapeTaskStatus::Completed {
                let stats = orchestrator.stats().await;
                assert_eq!(stats.completed_tasks, 1);
                assert_eq!(stats.failed_tasks, 0);
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("background monitor did not complete the task");
}

#[tokio::test]
async fn run_sync_variant_skips_polling() {
    let (products, violations, _) = stack().await;
    let ingestor = Arc::new(ResultIngestor::new(Arc::clone(&products), Arc::clone(&violations)));
    let config = OrchestratorConfig { use_run_sync: true, ..fast_config(false) };
    let orchestrator = ScrapeOrchestrator::new(
        Arc::new(ScriptedProvider),
        ingestor,
        Arc::clone(&products),
        config,
    );

    let task_id = orchestrator
        .execute(ScrapeKind::Product, vec!["B000TEST01".to_string()])
        .await
        .unwrap();

    assert_eq!(
        orchestrator.task(task_id).await.unwrap().status,
        ScrapeTaskStatus::Completed
    );
    assert!(products.get_product("B000TEST01").await.unwrap().is_some());
}
