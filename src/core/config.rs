//! Configuration management for gograph
//!
//! The configuration is an explicit value handed to each pipeline stage.
//! Nothing in the core reads files or environment variables; loading a TOML
//! file is left to the caller via [`Config::from_file`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration, one section per pipeline stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source discovery and parsing
    pub parser: ParserConfig,

    /// Relationship analysis
    pub analyzer: AnalyzerConfig,

    /// Graph model construction
    pub graph: GraphConfig,

    /// Graph store connection and batching
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Source parser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Directory names skipped anywhere in the tree
    pub ignore_dirs: Vec<String>,

    /// Glob patterns matched against root-relative file paths
    pub ignore_patterns: Vec<String>,

    /// Include `_test.go` files
    pub include_tests: bool,

    /// Include `vendor/` trees
    pub include_vendor: bool,

    /// Size of the parsing worker pool
    pub max_workers: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            ignore_dirs: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "testdata".to_string(),
            ],
            ignore_patterns: Vec::new(),
            include_tests: false,
            include_vendor: false,
            max_workers: 4,
        }
    }
}

/// Relationship analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Bound on call chain enumeration depth
    pub max_call_depth: i64,

    /// Compute per-function and per-package metrics
    pub compute_metrics: bool,

    /// Run circular dependency detection
    pub detect_cycles: bool,

    /// Fan interface method calls out to every implementing struct
    pub resolve_interface_dispatch: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 8,
            compute_metrics: true,
            detect_cycles: true,
            resolve_interface_dispatch: true,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_call_depth < 0 {
            return Err(ConfigError::NegativeDepth(self.max_call_depth));
        }
        Ok(())
    }
}

/// How node and relationship ids are assigned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// Fresh random id per run
    #[default]
    Random,
    /// Id derived from project, node type, qualified name and location
    ContentAddressed,
}

/// Graph model builder configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub identity: IdentityStrategy,
}

/// Backoff policy for connecting to the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Graph store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store endpoint, e.g. `sqlite://gograph.db` or `sqlite::memory:`
    pub uri: String,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Entities written per transaction
    pub batch_size: usize,

    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "sqlite://gograph.db".to_string(),
            username: None,
            password: None,
            batch_size: 1000,
            retry: RetryConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check every section. Called before a run does any work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parser.max_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        for pattern in &self.parser.ignore_patterns {
            globset::Glob::new(pattern).map_err(|e| ConfigError::BadPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        }
        self.analyzer.validate()?;
        if self.store.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.store.retry.max_attempts == 0 {
            return Err(ConfigError::NoRetryBudget);
        }
        if !(self.store.retry.multiplier >= 1.0) {
            return Err(ConfigError::BadMultiplier(
                self.store.retry.multiplier.to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [store]
            batch_size = 50

            [analyzer]
            detect_cycles = false
            "#,
        )
        .unwrap();

        assert_eq!(config.store.batch_size, 50);
        assert_eq!(config.store.retry.max_attempts, 3);
        assert!(!config.analyzer.detect_cycles);
        assert_eq!(config.parser.max_workers, 4);
        assert_eq!(config.graph.identity, IdentityStrategy::Random);
    }

    #[test]
    fn test_negative_depth_rejected() {
        let mut config = Config::default();
        config.analyzer.max_call_depth = -1;
        assert_eq!(config.validate(), Err(ConfigError::NegativeDepth(-1)));
    }

    #[test]
    fn test_bad_glob_rejected() {
        let mut config = Config::default();
        config.parser.ignore_patterns = vec!["a[".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadPattern { .. })
        ));
    }

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_after(1), Duration::from_secs(2));
        assert_eq!(retry.delay_after(2), Duration::from_secs(4));
        assert_eq!(retry.delay_after(3), Duration::from_secs(8));
        assert_eq!(retry.delay_after(4), Duration::from_secs(10));
    }

    #[test]
    fn test_round_trip_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gograph.toml");
        let mut config = Config::default();
        config.graph.identity = IdentityStrategy::ContentAddressed;
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.graph.identity, IdentityStrategy::ContentAddressed);
    }
}
