//! Validation gate

use crate::state::{Issue, IssueKind};
use std::path::Path;
use tf2avm_gateway::{GatewayError, OutputChecker};
use tf2avm_model::ValidationOutcome;

/// Check the written tree
///
/// A checker that cannot run yields a failed outcome with a single
/// `unavailable` error, never a pass. Only cancellation is returned as an
/// error.
pub async fn validate(checker: &dyn OutputChecker, output_dir: &Path) -> Result<ValidationOutcome, GatewayError> {
    let outcome = match checker.check_output(output_dir).await {
        Ok(outcome) => outcome.normalized(),
        Err(GatewayError::Cancelled) => return Err(GatewayError::Cancelled),
        Err(GatewayError::CheckerUnavailable(reason)) => {
            tracing::warn!(reason = %reason, "checker unavailable");
            ValidationOutcome::unavailable(reason)
        }
        Err(other) => {
            tracing::warn!(error = %other, "checker failed");
            ValidationOutcome::unavailable(other.to_string())
        }
    };
    tracing::info!(
        success = outcome.success,
        errors = outcome.errors.len(),
        warnings = outcome.warnings.len(),
        "validation finished"
    );
    Ok(outcome)
}

/// One issue per validation error, carrying the checker's exact message
#[must_use]
pub fn validation_issues(outcome: &ValidationOutcome) -> Vec<Issue> {
    outcome
        .errors
        .iter()
        .map(|error| Issue {
            kind: IssueKind::Validation,
            address: error.file.as_ref().map(|file| match error.line {
                Some(line) => format!("{file}:{line}"),
                None => file.clone(),
            }),
            message: error.message.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tf2avm_model::{ValidationError, TOOL_KIND_UNAVAILABLE};

    struct Fixed(Result<ValidationOutcome, GatewayError>);

    #[async_trait::async_trait]
    impl OutputChecker for Fixed {
        async fn check_output(&self, _output_dir: &Path) -> Result<ValidationOutcome, GatewayError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn unavailable_checker_is_not_a_pass() {
        let checker = Fixed(Err(GatewayError::CheckerUnavailable("Terraform CLI not found".into())));
        let outcome = validate(&checker, Path::new(".")).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].tool_kind, TOOL_KIND_UNAVAILABLE);
    }

    #[tokio::test]
    async fn errors_force_failure() {
        let inconsistent = ValidationOutcome {
            success: true,
            errors: vec![ValidationError::new("Unsupported argument", "terraform validate")],
            warnings: Vec::new(),
        };
        let outcome = validate(&Fixed(Ok(inconsistent)), Path::new(".")).await.unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn cancellation_propagates() {
        let checker = Fixed(Err(GatewayError::Cancelled));
        assert_eq!(validate(&checker, Path::new(".")).await, Err(GatewayError::Cancelled));
    }

    #[test]
    fn issues_keep_exact_messages() {
        let outcome = ValidationOutcome::failed(vec![ValidationError::new(
            "Missing required variable 'dns_servers'",
            "terraform validate",
        )
        .with_file("main.tf")
        .with_line(4)]);
        let issues = validation_issues(&outcome);
        assert_eq!(issues[0].message, "Missing required variable 'dns_servers'");
        assert_eq!(issues[0].address.as_deref(), Some("main.tf:4"));
    }
}
