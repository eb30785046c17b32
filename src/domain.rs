//! Domain module - Core business logic and entities
//!
//! This module contains the persisted row types and value objects of the
//! monitoring domain: products, reviews, violation findings, and the
//! append-only product history.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod history;
pub mod product;
pub mod review;
pub mod violation;

// Re-export commonly used items for convenience
// Note: Be specific about re-exports to avoid ambiguous glob warnings
pub use history::ProductSnapshot;
pub use product::{
    BestSellersRank, Product, ProductStatus, ProductVariation, RatingData, ReviewSummary,
    StarBreakdown,
};
pub use review::Review;
pub use violation::{
    RecommendedAction, ReviewViolation, Severity, UserBenefit, ViolationFinding,
    ViolationTaxonomy, CONTENT_VIOLATION_TYPE,
};
