use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The collapsed violation type literal used by the `collapsed` taxonomy.
pub const CONTENT_VIOLATION_TYPE: &str = "Content Violation";

/// Finding severity. The classifier's `Critical` always collapses to `High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            // Critical is folded into High; the schema never stored it.
            _ => Self::High,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

/// How much the flagged content still benefits other customers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserBenefit {
    Low,
    Medium,
    High,
}

impl UserBenefit {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Recommended handling for a flagged review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendedAction {
    Keep,
    Edit,
    Remove,
}

impl RecommendedAction {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "remove" => Self::Remove,
            "edit" => Self::Edit,
            _ => Self::Keep,
        }
    }
}

/// Which violation-type vocabulary persisted findings use.
///
/// The taxonomy was redefined over the life of the original schema; both
/// versions remain selectable instead of hard-coding either.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationTaxonomy {
    /// Keep the classifier-provided violation type verbatim.
    Rich,
    /// Rewrite every type to [`CONTENT_VIOLATION_TYPE`] and keep the
    /// original type in the free-text `category` field.
    #[default]
    Collapsed,
}

/// One policy finding on a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationFinding {
    pub violation_type: String,
    pub category: Option<String>,
    pub severity: Severity,
    pub user_benefit: Option<UserBenefit>,
    pub action: RecommendedAction,
    pub details: Option<String>,
}

impl ViolationFinding {
    /// Applies the configured taxonomy to this finding.
    #[must_use]
    pub fn normalized(mut self, taxonomy: ViolationTaxonomy) -> Self {
        if taxonomy == ViolationTaxonomy::Collapsed
            && self.violation_type != CONTENT_VIOLATION_TYPE
        {
            self.category = Some(std::mem::replace(
                &mut self.violation_type,
                CONTENT_VIOLATION_TYPE.to_string(),
            ));
        }
        self
    }
}

/// Persisted scan result for one review.
///
/// Never deleted; the only permitted mutation is setting the override
/// fields (soft dismissal preserving the audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewViolation {
    pub id: i64,
    pub review_id: String,
    pub asin: String,
    pub findings: Vec<ViolationFinding>,
    pub scanned_at: DateTime<Utc>,
    pub overridden: bool,
    pub overridden_by: Option<String>,
    pub overridden_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(violation_type: &str) -> ViolationFinding {
        ViolationFinding {
            violation_type: violation_type.to_string(),
            category: None,
            severity: Severity::High,
            user_benefit: Some(UserBenefit::Low),
            action: RecommendedAction::Remove,
            details: Some("contains a link".into()),
        }
    }

    #[test]
    fn critical_severity_collapses_to_high() {
        assert_eq!(Severity::parse("Critical"), Severity::High);
        assert_eq!(Severity::parse("critical"), Severity::High);
    }

    #[test]
    fn severity_parse_known_values() {
        assert_eq!(Severity::parse("Low"), Severity::Low);
        assert_eq!(Severity::parse("medium"), Severity::Medium);
        assert_eq!(Severity::parse("High"), Severity::High);
    }

    #[test]
    fn collapsed_taxonomy_rewrites_type() {
        let normalized = finding("Policy Violation").normalized(ViolationTaxonomy::Collapsed);
        assert_eq!(normalized.violation_type, CONTENT_VIOLATION_TYPE);
        assert_eq!(normalized.category.as_deref(), Some("Policy Violation"));
    }

    #[test]
    fn rich_taxonomy_keeps_type() {
        let normalized = finding("Policy Violation").normalized(ViolationTaxonomy::Rich);
        assert_eq!(normalized.violation_type, "Policy Violation");
        assert_eq!(normalized.category, None);
    }

    #[test]
    fn already_collapsed_type_is_untouched() {
        let normalized = finding(CONTENT_VIOLATION_TYPE).normalized(ViolationTaxonomy::Collapsed);
        assert_eq!(normalized.violation_type, CONTENT_VIOLATION_TYPE);
        assert_eq!(normalized.category, None);
    }
}
