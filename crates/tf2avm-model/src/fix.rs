//! Remediation proposals

use crate::validation::ErrorCategory;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum FixConfidence {
    High,
    Medium,
    Low,
}

/// Ordered most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub enum FixPriority {
    Critical,
    High,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

macro_rules! display_debug {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        })*
    };
}

display_debug!(FixConfidence, FixPriority, Complexity);

impl ErrorCategory {
    /// Priority of fixes for errors in this category
    #[must_use]
    pub fn fix_priority(self) -> FixPriority {
        match self {
            Self::Syntax | Self::Unavailable => FixPriority::Critical,
            Self::Reference | Self::Module | Self::Provider | Self::Version => FixPriority::High,
            Self::Resource | Self::Other => FixPriority::Normal,
        }
    }

    /// Expected effort to fix errors in this category
    #[must_use]
    pub fn fix_complexity(self) -> Complexity {
        match self {
            Self::Syntax | Self::Reference | Self::Version | Self::Unavailable => Complexity::Low,
            Self::Resource | Self::Module | Self::Provider => Complexity::Medium,
            Self::Other => Complexity::High,
        }
    }
}

/// One proposed fix for one error in one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FixProposal {
    pub file: String,
    pub error_summary: String,
    pub root_cause_analysis: String,
    pub proposed_fix_text: String,
    pub confidence: FixConfidence,
    pub requires_manual_review: bool,
    pub priority: FixPriority,
    pub estimated_complexity: Complexity,
}

impl FixProposal {
    /// Low-confidence proposal that asks for manual review
    #[must_use]
    pub fn manual_review(file: impl Into<String>, error_summary: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            error_summary: error_summary.into(),
            root_cause_analysis: "Automatic analysis was not available for this error".into(),
            proposed_fix_text: "Review the reported error and the converted module call by hand".into(),
            confidence: FixConfidence::Low,
            requires_manual_review: true,
            priority: FixPriority::High,
            estimated_complexity: Complexity::Medium,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_most_urgent_first() {
        assert!(FixPriority::Critical < FixPriority::High);
        assert!(FixPriority::High < FixPriority::Normal);
        assert_eq!(ErrorCategory::Syntax.fix_priority(), FixPriority::Critical);
        assert_eq!(ErrorCategory::Reference.fix_complexity(), Complexity::Low);
    }

    #[test]
    fn manual_review_proposal_is_low_confidence() {
        let proposal = FixProposal::manual_review("main.tf", "boom");
        assert!(proposal.requires_manual_review);
        assert_eq!(proposal.confidence, FixConfidence::Low);
    }
}
