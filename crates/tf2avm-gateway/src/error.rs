//! Error types for capability calls

/// Failure of a structured-proposal call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProposalError {
    /// Temporary failure; the call may be retried
    #[error("transient proposal failure: {0}")]
    Transient(String),

    /// The call did not complete within its deadline
    #[error("proposal timed out: {0}")]
    Timeout(String),

    /// The response did not satisfy its declared schema or contract
    #[error("malformed proposal: {0}")]
    Malformed(String),

    /// The proposer declined the request
    #[error("proposal rejected: {0}")]
    Rejected(String),
}

/// Errors surfaced by the external collaborators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Source configuration could not be parsed
    #[error("parse error in {file} at line {line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    /// Knowledge index could not be reached or read
    #[error("knowledge source unavailable: {0}")]
    KnowledgeUnavailable(String),

    /// Module detail lookup found nothing
    #[error("module not found: {name}@{version}")]
    ModuleNotFound { name: String, version: String },

    /// Proposal capability failed
    #[error(transparent)]
    Proposal(#[from] ProposalError),

    /// External checker could not be invoked
    #[error("checker unavailable: {0}")]
    CheckerUnavailable(String),

    /// Call abandoned because the run was cancelled
    #[error("cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Create a parse error
    pub fn parse(file: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    /// Create a module-not-found error
    pub fn module_not_found(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Shorthand for a malformed proposal
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Proposal(ProposalError::Malformed(message.into()))
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Proposal(ProposalError::Transient(_) | ProposalError::Timeout(_))
        )
    }
}
