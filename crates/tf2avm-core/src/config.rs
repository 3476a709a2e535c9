//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tf2avm_gateway::CallPolicy;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Terraform checker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub terraform_bin: PathBuf,
    pub init_timeout_secs: u64,
    pub validate_timeout_secs: u64,
    /// Skip `terraform init` (offline runs with a pre-populated plugin cache)
    pub skip_init: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            terraform_bin: PathBuf::from("terraform"),
            init_timeout_secs: 300,
            validate_timeout_secs: 120,
            skip_init: false,
        }
    }
}

/// Where module knowledge is read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// JSON module index
    pub index_path: PathBuf,
    /// Directory of `<module>_<version>.json` detail files
    pub details_dir: PathBuf,
    pub use_cache: bool,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("knowledge/index.json"),
            details_dir: PathBuf::from("knowledge/modules"),
            use_cache: true,
            cache_ttl_secs: 24 * 60 * 60,
            cache_capacity: 1_000,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Provider whose resources are candidates for conversion
    pub source_provider: String,
    /// Mapped candidates below this confidence trigger the review pass
    pub confidence_threshold: f64,
    /// Planning worker pool size
    pub max_parallel_plans: usize,
    /// Retries per capability call after the first attempt
    pub max_item_retries: u32,
    pub retry_backoff_ms: u64,
    /// Deadline of a single capability call
    pub call_timeout_secs: u64,
    /// Whole-run deadline; `None` disables it
    pub run_timeout_secs: Option<u64>,
    /// Root directory of persisted runs
    pub artifact_root: PathBuf,
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub log_filter: String,
    /// External proposer command (program followed by arguments);
    /// the built-in rule-based proposer is used when empty
    pub proposer_command: Vec<String>,
    pub knowledge: KnowledgeConfig,
    pub checker: CheckerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_provider: "azurerm".into(),
            confidence_threshold: 0.7,
            max_parallel_plans: 4,
            max_item_retries: 2,
            retry_backoff_ms: 500,
            call_timeout_secs: 120,
            run_timeout_secs: None,
            artifact_root: PathBuf::from("output"),
            log_filter: "info".into(),
            proposer_command: Vec::new(),
            knowledge: KnowledgeConfig::default(),
            checker: CheckerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_provider.trim().is_empty() {
            return Err(ConfigError::Invalid("source_provider must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.max_parallel_plans == 0 {
            return Err(ConfigError::Invalid("max_parallel_plans must be at least 1".into()));
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid("call_timeout_secs must be at least 1".into()));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("run_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Timeout/retry policy for capability calls
    #[must_use]
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy::default()
            .with_timeout(Duration::from_secs(self.call_timeout_secs))
            .with_max_retries(self.max_item_retries)
            .with_backoff(Duration::from_millis(self.retry_backoff_ms))
    }

    /// Whole-run deadline
    #[must_use]
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// With confidence threshold
    #[inline]
    #[must_use]
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// With planning pool size
    #[inline]
    #[must_use]
    pub fn with_max_parallel_plans(mut self, max: usize) -> Self {
        self.max_parallel_plans = max;
        self
    }

    /// With per-item retry budget
    #[inline]
    #[must_use]
    pub fn with_max_item_retries(mut self, retries: u32) -> Self {
        self.max_item_retries = retries;
        self
    }

    /// With retry backoff
    #[inline]
    #[must_use]
    pub fn with_retry_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.retry_backoff_ms = backoff_ms;
        self
    }

    /// With capability call deadline
    #[inline]
    #[must_use]
    pub fn with_call_timeout_secs(mut self, secs: u64) -> Self {
        self.call_timeout_secs = secs;
        self
    }

    /// With run deadline
    #[inline]
    #[must_use]
    pub fn with_run_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.run_timeout_secs = secs;
        self
    }

    /// With artifact root
    #[inline]
    #[must_use]
    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = root.into();
        self
    }

    /// With knowledge cache switch
    #[inline]
    #[must_use]
    pub fn with_knowledge_cache(mut self, use_cache: bool) -> Self {
        self.knowledge.use_cache = use_cache;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.source_provider, "azurerm");
        assert_eq!(config.confidence_threshold, 0.7);
        assert_eq!(config.max_parallel_plans, 4);
        assert_eq!(config.checker.init_timeout_secs, 300);
        assert_eq!(config.checker.validate_timeout_secs, 120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            confidence_threshold = 0.8
            run_timeout_secs = 600

            [checker]
            skip_init = true
            "#,
        )
        .unwrap();
        assert_eq!(config.confidence_threshold, 0.8);
        assert_eq!(config.run_timeout(), Some(Duration::from_secs(600)));
        assert!(config.checker.skip_init);
        assert_eq!(config.checker.validate_timeout_secs, 120);
        assert_eq!(config.max_item_retries, 2);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(matches!(
            PipelineConfig::from_toml_str("confidence_threshold = 1.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(PipelineConfig::new().with_max_parallel_plans(0).validate().is_err());
        assert!(matches!(
            PipelineConfig::from_toml_str("max_parallel_plans = \"four\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn call_policy_reflects_config() {
        let policy = PipelineConfig::new()
            .with_max_item_retries(5)
            .with_call_timeout_secs(9)
            .call_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.timeout, Duration::from_secs(9));
    }
}
