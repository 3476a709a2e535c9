//! Proposal engine backed by an external command
//!
//! The request is written to the command's stdin as one JSON document
//! `{"operation": ..., "payload": ...}`; the command answers on stdout with
//! the JSON of the expected result type. Replies are checked against the
//! type's JSON schema before they are deserialised.

use crate::capability::ProposalEngine;
use crate::error::{GatewayError, ProposalError};
use jsonschema::JSONSchema;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tf2avm_model::{
    ConversionPlan, FixProposal, KnowledgeIndex, Manifest, MappingResult, ModuleDetails,
    PlanRequest, ValidationOutcome,
};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Exit code a command uses to decline a request
pub const EXIT_REJECTED: i32 = 3;

#[derive(Debug, Clone)]
pub struct CommandProposer {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandProposer {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(120),
        }
    }

    /// With extra arguments
    #[inline]
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// With per-call deadline
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call<T>(&self, operation: &str, payload: Value) -> Result<T, GatewayError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let request = serde_json::to_vec(&json!({ "operation": operation, "payload": payload }))
            .map_err(|e| GatewayError::malformed(format!("request encoding: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProposalError::Transient(format!("failed to start {}: {e}", self.program.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&request)
                .await
                .map_err(|e| ProposalError::Transient(format!("stdin: {e}")))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ProposalError::Timeout(format!("{operation} exceeded {} s", self.timeout.as_secs()))
            })?
            .map_err(|e| ProposalError::Transient(format!("wait: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(match output.status.code() {
                Some(EXIT_REJECTED) => ProposalError::Rejected(stderr),
                _ => ProposalError::Transient(format!("{operation} exited with {}: {stderr}", output.status)),
            }
            .into());
        }

        let value: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| GatewayError::malformed(format!("{operation} reply is not JSON: {e}")))?;
        decode_checked(&value)
    }
}

/// Validate `value` against the schema of `T`, then deserialise it
pub fn decode_checked<T>(value: &Value) -> Result<T, GatewayError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = serde_json::to_value(schemars::schema_for!(T))
        .map_err(|e| GatewayError::malformed(format!("schema encoding: {e}")))?;
    let compiled = JSONSchema::compile(&schema)
        .map_err(|e| GatewayError::malformed(format!("schema compilation: {e}")))?;
    let violations: Vec<String> = match compiled.validate(value) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.map(|e| format!("{}: {e}", e.instance_path)).collect(),
    };
    if !violations.is_empty() {
        return Err(GatewayError::malformed(violations.join("; ")));
    }
    serde_json::from_value(value.clone()).map_err(|e| GatewayError::malformed(e.to_string()))
}

fn payload<T: Serialize + ?Sized>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError::malformed(format!("request encoding: {e}")))
}

#[async_trait::async_trait]
impl ProposalEngine for CommandProposer {
    async fn propose_mapping(
        &self,
        manifest: &Manifest,
        knowledge: &KnowledgeIndex,
        prior: Option<&MappingResult>,
        details: Option<&ModuleDetails>,
    ) -> Result<MappingResult, GatewayError> {
        let operation = if prior.is_some() { "review_mappings" } else { "propose_mapping" };
        let body = json!({
            "manifest": payload(manifest)?,
            "knowledge": payload(knowledge)?,
            "prior": payload(&prior)?,
            "details": payload(&details)?,
        });
        self.call(operation, body).await
    }

    async fn propose_plan(&self, request: &PlanRequest) -> Result<ConversionPlan, GatewayError> {
        self.call("propose_plan", payload(request)?).await
    }

    async fn propose_fixes(
        &self,
        outcome: &ValidationOutcome,
        output_dir: &Path,
        plans: &[ConversionPlan],
    ) -> Result<Vec<FixProposal>, GatewayError> {
        let body = json!({
            "outcome": payload(outcome)?,
            "output_dir": output_dir.display().to_string(),
            "plans": payload(plans)?,
        });
        self.call("propose_fixes", body).await
    }
}
