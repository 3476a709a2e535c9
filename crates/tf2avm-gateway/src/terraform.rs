//! Terraform CLI checker
//!
//! Runs `terraform init` followed by `terraform validate -json` in the output
//! directory and turns the JSON diagnostics into a [`ValidationOutcome`].

use crate::capability::OutputChecker;
use crate::error::GatewayError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tf2avm_model::{ValidationError, ValidationOutcome};
use tokio::process::Command;

const TOOL_INIT: &str = "terraform init";
const TOOL_VALIDATE: &str = "terraform validate";

#[derive(Debug, Clone)]
pub struct TerraformChecker {
    binary: PathBuf,
    init_timeout: Duration,
    validate_timeout: Duration,
    skip_init: bool,
}

impl Default for TerraformChecker {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("terraform"),
            init_timeout: Duration::from_secs(300),
            validate_timeout: Duration::from_secs(120),
            skip_init: false,
        }
    }
}

impl TerraformChecker {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_validate_timeout(mut self, timeout: Duration) -> Self {
        self.validate_timeout = timeout;
        self
    }

    /// Skip `terraform init` (providers and modules already installed)
    #[inline]
    #[must_use]
    pub fn with_skip_init(mut self, skip_init: bool) -> Self {
        self.skip_init = skip_init;
        self
    }

    async fn run(&self, dir: &Path, args: &[&str], timeout: Duration) -> Result<Output, GatewayError> {
        let child = Command::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    GatewayError::CheckerUnavailable("Terraform CLI not found".into())
                }
                _ => GatewayError::CheckerUnavailable(format!(
                    "failed to start {}: {e}",
                    self.binary.display()
                )),
            })?;
        tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                GatewayError::CheckerUnavailable(format!(
                    "terraform {} timed out after {} s",
                    args.first().copied().unwrap_or_default(),
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| GatewayError::CheckerUnavailable(e.to_string()))
    }
}

#[async_trait::async_trait]
impl OutputChecker for TerraformChecker {
    async fn check_output(&self, output_dir: &Path) -> Result<ValidationOutcome, GatewayError> {
        if !has_tf_files(output_dir).await {
            return Ok(ValidationOutcome::failed(vec![ValidationError::new(
                "No Terraform files found in output directory",
                TOOL_VALIDATE,
            )]));
        }

        if !self.skip_init {
            let init = self
                .run(output_dir, &["init", "-backend=false", "-input=false", "-no-color"], self.init_timeout)
                .await?;
            if !init.status.success() {
                let stderr = String::from_utf8_lossy(&init.stderr);
                tracing::warn!(dir = %output_dir.display(), "terraform init failed");
                return Ok(ValidationOutcome::failed(vec![ValidationError::new(
                    format!("terraform init failed: {}", stderr.trim()),
                    TOOL_INIT,
                )]));
            }
        }

        let validate = self
            .run(output_dir, &["validate", "-json", "-no-color"], self.validate_timeout)
            .await?;
        let stdout = String::from_utf8_lossy(&validate.stdout);
        match parse_validate_json(&stdout) {
            Ok(outcome) => Ok(outcome),
            Err(parse_error) => {
                let stderr = String::from_utf8_lossy(&validate.stderr);
                let message = if stderr.trim().is_empty() {
                    format!("unreadable terraform validate output: {parse_error}")
                } else {
                    stderr.trim().to_string()
                };
                Ok(ValidationOutcome::failed(vec![ValidationError::new(message, TOOL_VALIDATE)]))
            }
        }
    }
}

async fn has_tf_files(dir: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.path().extension().map_or(false, |ext| ext == "tf") {
            return true;
        }
    }
    false
}

#[derive(Debug, Deserialize)]
struct ValidateReport {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Deserialize)]
struct Diagnostic {
    severity: String,
    summary: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    range: Option<Range>,
}

#[derive(Debug, Deserialize)]
struct Range {
    filename: String,
    start: Position,
}

#[derive(Debug, Deserialize)]
struct Position {
    line: u32,
}

/// Parse the output of `terraform validate -json`
pub fn parse_validate_json(stdout: &str) -> Result<ValidationOutcome, serde_json::Error> {
    let report: ValidateReport = serde_json::from_str(stdout)?;
    let mut outcome = ValidationOutcome {
        success: report.valid,
        errors: Vec::new(),
        warnings: Vec::new(),
    };
    for diagnostic in report.diagnostics {
        let message = if diagnostic.detail.trim().is_empty() {
            diagnostic.summary
        } else {
            format!("{}: {}", diagnostic.summary, diagnostic.detail.trim())
        };
        if diagnostic.severity == "error" {
            let mut error = ValidationError::new(message, TOOL_VALIDATE);
            if let Some(range) = diagnostic.range {
                error = error.with_file(range.filename).with_line(range.start.line);
            }
            outcome.errors.push(error);
        } else {
            outcome.warnings.push(message);
        }
    }
    Ok(outcome.normalized())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn diagnostics_become_errors_and_warnings() {
        let json = r#"{
          "format_version": "1.0",
          "valid": false,
          "error_count": 1,
          "warning_count": 1,
          "diagnostics": [
            {
              "severity": "error",
              "summary": "Missing required variable 'dns_servers'",
              "detail": "",
              "range": {"filename": "main.tf", "start": {"line": 4, "column": 1, "byte": 30}, "end": {"line": 4, "column": 9, "byte": 38}}
            },
            {
              "severity": "warning",
              "summary": "Deprecated attribute",
              "detail": "Use resource_id instead."
            }
          ]
        }"#;
        let outcome = parse_validate_json(json).unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.errors,
            vec![ValidationError::new("Missing required variable 'dns_servers'", TOOL_VALIDATE)
                .with_file("main.tf")
                .with_line(4)]
        );
        assert_eq!(outcome.warnings, vec!["Deprecated attribute: Use resource_id instead.".to_string()]);
    }

    #[test]
    fn valid_report_passes() {
        let outcome =
            parse_validate_json(r#"{"valid": true, "error_count": 0, "diagnostics": []}"#).unwrap();
        assert_eq!(outcome, ValidationOutcome::passed());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_validate_json("Error: no configuration").is_err());
    }

    #[tokio::test]
    async fn empty_directory_fails_without_running_terraform() {
        let dir = tempfile::tempdir().unwrap();
        let checker = TerraformChecker::new("/nonexistent/terraform");
        let outcome = checker.check_output(dir.path()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("main.tf"), "").await.unwrap();
        let checker = TerraformChecker::new("/nonexistent/terraform");
        let err = checker.check_output(dir.path()).await.unwrap_err();
        assert_eq!(err, GatewayError::CheckerUnavailable("Terraform CLI not found".into()));
    }
}
