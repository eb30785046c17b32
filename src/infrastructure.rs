//! Infrastructure layer for database access, configuration, logging, and
//! external service integrations
//!
//! This module provides the database connection and repositories, the HTTP
//! client shared by the external API integrations, the actor-run scraper
//! client, and configuration/logging bootstrap.

pub mod config;
pub mod database_connection;
pub mod http_client;
pub mod logging;
pub mod product_repository;
pub mod scraper_api;
pub mod violation_repository;

// Re-export commonly used items
pub use config::AppConfig;
pub use database_connection::DatabaseConnection;
pub use http_client::{HttpClient, HttpClientConfig};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use product_repository::ProductRepository;
pub use scraper_api::{ScraperApiClient, ScraperApiConfig};
pub use violation_repository::ViolationRepository;
