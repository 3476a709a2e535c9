//! Checker results

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `tool_kind` used when the checker could not be invoked at all
pub const TOOL_KIND_UNAVAILABLE: &str = "unavailable";

/// One checker error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
    /// Which tool (or tool phase) produced the error
    pub tool_kind: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(message: impl Into<String>, tool_kind: impl Into<String>) -> Self {
        Self {
            file: None,
            line: None,
            message: message.into(),
            tool_kind: tool_kind.into(),
        }
    }

    /// With file
    #[inline]
    #[must_use]
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// With line
    #[inline]
    #[must_use]
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Error category derived from tool kind and message
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        if self.tool_kind == TOOL_KIND_UNAVAILABLE {
            ErrorCategory::Unavailable
        } else {
            ErrorCategory::classify(&self.message)
        }
    }
}

/// Result of checking the written output tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationOutcome {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<ValidationError>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    /// Clean pass
    #[must_use]
    pub fn passed() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Failed with errors
    #[must_use]
    pub fn failed(errors: Vec<ValidationError>) -> Self {
        Self {
            success: false,
            errors,
            warnings: Vec::new(),
        }
    }

    /// Checker could not be run
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::failed(vec![ValidationError::new(message, TOOL_KIND_UNAVAILABLE)])
    }

    /// Success only holds with zero errors
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if !self.errors.is_empty() {
            self.success = false;
        }
        self
    }

    /// Distinct files named by errors, sorted
    #[must_use]
    pub fn affected_files(&self) -> Vec<String> {
        let files: std::collections::BTreeSet<String> =
            self.errors.iter().filter_map(|e| e.file.clone()).collect();
        files.into_iter().collect()
    }
}

/// Broad class of a checker error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Syntax,
    Provider,
    Resource,
    Reference,
    Module,
    Version,
    Unavailable,
    Other,
}

impl ErrorCategory {
    /// Classify a checker message by keyword
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let m = message.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| m.contains(n));
        if has(&["unavailable", "not found in path", "cli not found"]) {
            Self::Unavailable
        } else if has(&["syntax", "argument or block definition required", "invalid expression", "unclosed", "unterminated"]) {
            Self::Syntax
        } else if has(&["version constraint", "no available releases", "incompatible version"]) {
            Self::Version
        } else if has(&["provider"]) {
            Self::Provider
        } else if has(&["module", "source address"]) {
            Self::Module
        } else if has(&["variable", "reference to undeclared", "undeclared", "unknown variable"]) {
            Self::Reference
        } else if has(&["resource", "argument", "attribute", "unsupported block"]) {
            Self::Resource
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Syntax => "syntax",
            Self::Provider => "provider",
            Self::Resource => "resource configuration",
            Self::Reference => "variable/reference",
            Self::Module => "module",
            Self::Version => "version constraint",
            Self::Unavailable => "checker unavailable",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}
