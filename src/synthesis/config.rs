//! Synthesis configuration.
//!
//! Every value is fixed when a run starts and stays immutable for the run's
//! lifetime.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::validation::SemanticChecks;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the synthesis orchestrator.
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Maximum number of repair attempts after the first generation.
    pub max_iterations: u32,
    /// Wall-clock limit for one generator call.
    pub generator_timeout: Duration,
    /// Wall-clock limit for one execution of a candidate specification.
    pub execution_timeout: Duration,
    /// Number of dataset rows shown to the generator.
    pub sample_rows: usize,
    /// Number of output rows kept on the report and the ledger record.
    pub output_sample_rows: usize,
    /// Acceptance checks for the semantic pass.
    pub semantic_checks: SemanticChecks,
    /// Model passed to the LLM provider. Empty means the provider default.
    pub model: String,
    pub temperature: f64,
    /// How long recorded output artifacts are retained.
    pub artifact_ttl: Duration,
    /// Directory of the file-backed ledger.
    pub ledger_dir: PathBuf,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            generator_timeout: Duration::from_secs(120),
            execution_timeout: Duration::from_secs(30),
            sample_rows: 20,
            output_sample_rows: 20,
            semantic_checks: SemanticChecks::default(),
            model: String::new(),
            temperature: 0.2,
            artifact_ttl: Duration::from_secs(24 * 60 * 60),
            ledger_dir: PathBuf::from("./pipeforge-runs"),
        }
    }
}

impl SynthesisConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PIPEFORGE_MAX_ITERATIONS`: repair attempts (default: 3)
    /// - `PIPEFORGE_GENERATOR_TIMEOUT_SECS`: generator call timeout (default: 120)
    /// - `PIPEFORGE_EXECUTION_TIMEOUT_SECS`: execution timeout (default: 30)
    /// - `PIPEFORGE_SAMPLE_ROWS`: rows shown to the generator (default: 20)
    /// - `PIPEFORGE_OUTPUT_SAMPLE_ROWS`: rows kept from the output (default: 20)
    /// - `PIPEFORGE_REQUIRED_COLUMNS`: comma-separated required output columns
    /// - `PIPEFORGE_REJECT_EMPTY_OUTPUT`: reject empty output (default: true)
    /// - `PIPEFORGE_MAX_OUTPUT_ROWS`: upper bound on output rows
    /// - `PIPEFORGE_MAX_ROW_GROWTH`: upper bound on output/input row ratio
    /// - `PIPEFORGE_MODEL`: model name (default: provider default)
    /// - `PIPEFORGE_TEMPERATURE`: sampling temperature (default: 0.2)
    /// - `PIPEFORGE_ARTIFACT_TTL_HOURS`: artifact retention (default: 24)
    /// - `PIPEFORGE_LEDGER_DIR`: ledger directory (default: ./pipeforge-runs)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = lookup("PIPEFORGE_MAX_ITERATIONS") {
            config.max_iterations = parse_env_value(&val, "PIPEFORGE_MAX_ITERATIONS")?;
        }
        if let Some(val) = lookup("PIPEFORGE_GENERATOR_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "PIPEFORGE_GENERATOR_TIMEOUT_SECS")?;
            config.generator_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("PIPEFORGE_EXECUTION_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "PIPEFORGE_EXECUTION_TIMEOUT_SECS")?;
            config.execution_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("PIPEFORGE_SAMPLE_ROWS") {
            config.sample_rows = parse_env_value(&val, "PIPEFORGE_SAMPLE_ROWS")?;
        }
        if let Some(val) = lookup("PIPEFORGE_OUTPUT_SAMPLE_ROWS") {
            config.output_sample_rows = parse_env_value(&val, "PIPEFORGE_OUTPUT_SAMPLE_ROWS")?;
        }

        if let Some(val) = lookup("PIPEFORGE_REQUIRED_COLUMNS") {
            config.semantic_checks.required_columns = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(val) = lookup("PIPEFORGE_REJECT_EMPTY_OUTPUT") {
            config.semantic_checks.reject_empty_output =
                parse_env_bool(&val, "PIPEFORGE_REJECT_EMPTY_OUTPUT")?;
        }
        if let Some(val) = lookup("PIPEFORGE_MAX_OUTPUT_ROWS") {
            config.semantic_checks.max_output_rows =
                Some(parse_env_value(&val, "PIPEFORGE_MAX_OUTPUT_ROWS")?);
        }
        if let Some(val) = lookup("PIPEFORGE_MAX_ROW_GROWTH") {
            config.semantic_checks.max_row_growth =
                Some(parse_env_value(&val, "PIPEFORGE_MAX_ROW_GROWTH")?);
        }

        if let Some(val) = lookup("PIPEFORGE_MODEL") {
            config.model = val;
        }
        if let Some(val) = lookup("PIPEFORGE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "PIPEFORGE_TEMPERATURE")?;
        }
        if let Some(val) = lookup("PIPEFORGE_ARTIFACT_TTL_HOURS") {
            let hours: u64 = parse_env_value(&val, "PIPEFORGE_ARTIFACT_TTL_HOURS")?;
            config.artifact_ttl = Duration::from_secs(hours * 60 * 60);
        }
        if let Some(val) = lookup("PIPEFORGE_LEDGER_DIR") {
            config.ledger_dir = PathBuf::from(val);
        }

        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        if self.generator_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "generator_timeout must be greater than 0".to_string(),
            ));
        }

        if self.execution_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "execution_timeout must be greater than 0".to_string(),
            ));
        }

        if self.sample_rows == 0 {
            return Err(ConfigError::ValidationFailed(
                "sample_rows must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if let Some(ratio) = self.semantic_checks.max_row_growth {
            if !ratio.is_finite() || ratio <= 0.0 {
                return Err(ConfigError::ValidationFailed(
                    "max_row_growth must be a positive number".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_generator_timeout(mut self, timeout: Duration) -> Self {
        self.generator_timeout = timeout;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_sample_rows(mut self, rows: usize) -> Self {
        self.sample_rows = rows;
        self
    }

    pub fn with_semantic_checks(mut self, checks: SemanticChecks) -> Self {
        self.semantic_checks = checks;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_artifact_ttl(mut self, ttl: Duration) -> Self {
        self.artifact_ttl = ttl;
        self
    }

    pub fn with_ledger_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ledger_dir = dir.into();
        self
    }
}

/// Parse an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
