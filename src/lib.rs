//! Review Sentinel - Amazon Product & Review Monitoring Service
//!
//! This crate ingests product and review data from an external actor-run
//! scraping provider, persists it into a relational store, and detects
//! review policy violations through a webhook-based classifier workflow.

// Module declarations
pub mod domain;
pub mod infrastructure;
pub mod scraping;
pub mod violations;
