//! # Violation Scan Module
//!
//! Submits stored reviews to the external violation classifier and persists
//! the findings. The classifier's contract is not fixed: the client decodes
//! each known response envelope explicitly and reports anything else as an
//! unrecognized shape instead of guessing.

pub mod client;
pub mod scanner;

// Clean re-exports
pub use client::{
    ClassifierClient, ClassifierConfig, ClassifierError, FindingsByReview, RawFinding,
    ReviewClassifier, ReviewPayload,
};
pub use scanner::{ScanConfig, ScanError, ScanMode, ScanOutcome, ViolationScanner};
