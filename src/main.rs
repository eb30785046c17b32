//! Review Sentinel daemon
//!
//! Wires the services together and runs the queue scheduler until ctrl-c:
//! config, logging, database, the scraper provider, ingestion, the
//! violation scan pipeline, and the bounded work queue.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use review_sentinel::infrastructure::config::AppConfig;
use review_sentinel::infrastructure::database_connection::DatabaseConnection;
use review_sentinel::infrastructure::http_client::HttpClient;
use review_sentinel::infrastructure::logging::init_logging_with_config;
use review_sentinel::infrastructure::product_repository::ProductRepository;
use review_sentinel::infrastructure::scraper_api::ScraperApiClient;
use review_sentinel::infrastructure::violation_repository::ViolationRepository;
use review_sentinel::scraping::ingest::ResultIngestor;
use review_sentinel::scraping::orchestrator::ScrapeOrchestrator;
use review_sentinel::scraping::queue::{QueueManager, QueueWorker};
use review_sentinel::scraping::tasks::ScrapeKind;
use review_sentinel::violations::client::ClassifierClient;
use review_sentinel::violations::scanner::ViolationScanner;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().await?;
    init_logging_with_config(&config.logging)?;
    info!("Starting review-sentinel");

    let db = DatabaseConnection::new(&config.database.url).await?;
    db.migrate().await?;

    let http = Arc::new(HttpClient::new(config.http_client_config())?);
    let provider = Arc::new(ScraperApiClient::new(
        Arc::clone(&http),
        config.scraper_api_config(),
    ));

    let products = Arc::new(ProductRepository::new(db.pool().clone()));
    let violations = Arc::new(ViolationRepository::new(db.pool().clone()));
    let ingestor = Arc::new(ResultIngestor::new(
        Arc::clone(&products),
        Arc::clone(&violations),
    ));

    let classifier = Arc::new(ClassifierClient::new(
        Arc::clone(&http),
        config.classifier_config(),
    ));
    let scanner = Arc::new(ViolationScanner::new(
        classifier,
        Arc::clone(&violations),
        config.scan_config(),
    ));

    let orchestrator = Arc::new(
        ScrapeOrchestrator::new(
            provider,
            ingestor,
            Arc::clone(&products),
            config.orchestrator_config(),
        )
        .with_scanner(scanner),
    );

    let queue = Arc::new(QueueManager::new(
        Arc::clone(&orchestrator) as Arc<dyn QueueWorker>,
        config.queue_config(),
    ));

    for asin in &config.monitor.asins {
        match queue
            .enqueue(asin, ScrapeKind::Product, config.monitor.priority)
            .await
        {
            Ok(id) => info!("Monitoring {} (queue item {})", asin, id),
            Err(e) => warn!("Could not enqueue {}: {}", asin, e),
        }
    }

    let scheduler = queue.start();
    info!("Queue scheduler running; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, stopping scheduler and in-flight scrapes");

    orchestrator.cancellation_token().cancel();
    queue.shutdown();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, scheduler).await.is_err() {
        warn!("Scheduler did not stop within {:?}", SHUTDOWN_TIMEOUT);
    }

    info!("Stopped");
    Ok(())
}
