//! Configuration types for the tool runtime

use crate::error::{Result, RuntimeError};
use crate::tools::CircuitBreakerConfig;
use figment::{
    Figment,
    providers::{Env, Format, Json, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolrunConfig {
    /// Call pipeline settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Circuit breaker strategy and defaults
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Result cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// Plan execution settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Call pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Deadline for plugins that declare no `rate_limit.timeout`
    #[serde(default, with = "humantime_serde")]
    pub default_timeout: Option<Duration>,

    /// Serve stale cache entries when the circuit is open
    #[serde(default = "default_true")]
    pub degrade_on_circuit_open: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: None,
            degrade_on_circuit_open: true,
        }
    }
}

/// Built-in circuit breaker strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStrategyKind {
    /// Every execution failure counts
    #[default]
    Count,
    /// Only failures carrying a trip status code count
    StatusCode,
}

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Active strategy
    #[serde(default)]
    pub strategy: BreakerStrategyKind,

    /// Config for plugins that declare none
    #[serde(default)]
    pub default: CircuitBreakerConfig,
}

/// Result cache settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Period of the background expiry sweep; lazy expiry only when unset
    #[serde(default, with = "humantime_serde")]
    pub sweep_interval: Option<Duration>,

    /// Stale window for tools whose cache config sets none
    #[serde(default, with = "humantime_serde")]
    pub default_stale_if_error: Option<Duration>,
}

/// Plan execution settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Run independent ready steps concurrently
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Upper bound on concurrently running steps
    #[serde(default = "default_max_parallel_steps")]
    pub max_parallel_steps: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_parallel_steps: default_max_parallel_steps(),
        }
    }
}

impl OrchestratorConfig {
    /// Run every step one after another in declaration order
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Default::default()
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_parallel_steps() -> usize {
    8
}

impl ToolrunConfig {
    /// Load configuration from `toolrun.toml`, `TOOLRUN_` environment
    /// variables, and the file named by `TOOLRUN_CONFIG_PATH`, in that order.
    ///
    /// Nested keys are separated by a double underscore in environment
    /// variables, e.g. `TOOLRUN_EXECUTOR__DEFAULT_TIMEOUT=5s`.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load() -> Result<Self> {
        let mut figment = Figment::new()
            .merge(Toml::file("toolrun.toml"))
            .merge(Env::prefixed("TOOLRUN_").split("__"));

        // Check for custom config path
        if let Ok(path) = std::env::var("TOOLRUN_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        Self::from_figment(figment)
    }

    /// Load configuration from a specific file.
    ///
    /// The format follows the extension: `.yaml`/`.yml`, `.json`, anything
    /// else is read as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RuntimeError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
            Some("json") => Figment::new().merge(Json::file(path)),
            _ => Figment::new().merge(Toml::file(path)),
        };
        Self::from_figment(figment)
    }

    /// Extract and validate configuration from an assembled figment
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: ToolrunConfig = figment.extract().map_err(|e| {
            RuntimeError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.circuit_breaker.default.failure_threshold == 0 {
            return Err(RuntimeError::Configuration(
                "circuit_breaker.default.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.max_parallel_steps == 0 {
            return Err(RuntimeError::Configuration(
                "orchestrator.max_parallel_steps must be greater than 0".to_string(),
            ));
        }
        if self.cache.sweep_interval.is_some_and(|d| d.is_zero()) {
            return Err(RuntimeError::Configuration(
                "cache.sweep_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ToolrunConfig::default();
        assert!(config.executor.degrade_on_circuit_open);
        assert_eq!(config.circuit_breaker.strategy, BreakerStrategyKind::Count);
        assert_eq!(config.circuit_breaker.default.failure_threshold, 5);
        assert_eq!(
            config.circuit_breaker.default.reset_timeout,
            Duration::from_secs(30)
        );
        assert!(config.orchestrator.parallel);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[executor]
default_timeout = "5s"
degrade_on_circuit_open = false

[circuit_breaker]
strategy = "status_code"

[circuit_breaker.default]
failureThreshold = 2
resetTimeout = "10s"

[cache]
sweep_interval = "1m"
default_stale_if_error = "30s"

[orchestrator]
parallel = false
"#
        )
        .unwrap();

        let config = ToolrunConfig::from_file(file.path()).unwrap();
        assert_eq!(config.executor.default_timeout, Some(Duration::from_secs(5)));
        assert!(!config.executor.degrade_on_circuit_open);
        assert_eq!(config.circuit_breaker.strategy, BreakerStrategyKind::StatusCode);
        assert_eq!(config.circuit_breaker.default.failure_threshold, 2);
        assert_eq!(
            config.circuit_breaker.default.reset_timeout,
            Duration::from_secs(10)
        );
        assert_eq!(config.cache.sweep_interval, Some(Duration::from_secs(60)));
        assert!(!config.orchestrator.parallel);
        assert_eq!(config.orchestrator.max_parallel_steps, 8);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "orchestrator:\n  max_parallel_steps: 2\n").unwrap();

        let config = ToolrunConfig::from_file(file.path()).unwrap();
        assert_eq!(config.orchestrator.max_parallel_steps, 2);
    }

    #[test]
    fn test_validation_rejects_zero_parallelism() {
        let figment = Figment::new().merge(Toml::string("[orchestrator]\nmax_parallel_steps = 0"));
        let err = ToolrunConfig::from_figment(figment).unwrap_err();
        assert!(err.to_string().contains("max_parallel_steps"));
    }

    #[test]
    fn test_missing_file() {
        let err = ToolrunConfig::from_file("/nonexistent/toolrun.toml").unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }
}
