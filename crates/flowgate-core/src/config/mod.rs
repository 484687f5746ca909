//! Configuration for Flowgate.
//!
//! Settings are read from TOML. Every section and field has a default, so an empty file
//! (or no file at all) yields a working in-memory setup.
//!
//! ```toml
//! [storage]
//! path = "flows.db"
//!
//! [orchestrator]
//! max_recycles = 5
//!
//! [gates]
//! pass_threshold = 75.0
//! decision_options = ["GO", "RECYCLE", "KILL"]
//!
//! [logging]
//! level = "debug"
//! json = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::Decision;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "FLOWGATE_CONFIG";

/// File looked up in the working directory when the variable is unset.
pub const DEFAULT_CONFIG_FILE: &str = "flowgate.toml";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    Io(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    Validation(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowgateConfig {
    /// Where records are kept.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Tree walk limits and defaults.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Defaults for gate nodes that leave settings out.
    #[serde(default)]
    pub gates: GateDefaults,

    /// Subscriber setup.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file. `None` keeps everything in memory.
    #[serde(default)]
    pub path: Option<String>,
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Recycles allowed per gate per execution when the gate sets no bound.
    #[serde(default = "default_max_recycles")]
    pub max_recycles: u32,

    /// Agent invocation budget when the node sets none.
    #[serde(default = "default_agent_timeout_secs")]
    pub default_agent_timeout_secs: u64,

    /// Episodic examples handed to each agent invocation.
    #[serde(default = "default_episodic_example_limit")]
    pub episodic_example_limit: usize,
}

fn default_max_recycles() -> u32 {
    3
}

fn default_agent_timeout_secs() -> u64 {
    300
}

fn default_episodic_example_limit() -> usize {
    3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_recycles: default_max_recycles(),
            default_agent_timeout_secs: default_agent_timeout_secs(),
            episodic_example_limit: default_episodic_example_limit(),
        }
    }
}

/// Gate settings applied when a gate node's config omits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDefaults {
    /// Score needed for a pass-class decision.
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,

    /// Decisions a gate may emit.
    #[serde(default = "default_decision_options")]
    pub decision_options: Vec<Decision>,

    /// `"automated"` or `"human"`.
    #[serde(default = "default_gate_type")]
    pub gate_type: String,

    /// Weight of a rule whose metadata sets none.
    #[serde(default = "default_rule_weight")]
    pub default_rule_weight: f64,

    /// Fraction of the threshold below which a score is rejected outright.
    #[serde(default = "default_marginal_ratio")]
    pub marginal_ratio: f64,
}

fn default_pass_threshold() -> f64 {
    80.0
}

fn default_decision_options() -> Vec<Decision> {
    vec![Decision::Go, Decision::Recycle]
}

fn default_gate_type() -> String {
    "automated".to_string()
}

fn default_rule_weight() -> f64 {
    10.0
}

fn default_marginal_ratio() -> f64 {
    0.7
}

impl Default for GateDefaults {
    fn default() -> Self {
        Self {
            pass_threshold: default_pass_threshold(),
            decision_options: default_decision_options(),
            gate_type: default_gate_type(),
            default_rule_weight: default_rule_weight(),
            marginal_ratio: default_marginal_ratio(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

impl FlowgateConfig {
    /// Loads and validates a TOML file.
    ///
    /// # Errors
    /// * `ConfigError::Io` - If the file cannot be read
    /// * `ConfigError::Parse` - If the TOML is malformed
    /// * `ConfigError::Validation` - If a value is out of range
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from `$FLOWGATE_CONFIG`, then `./flowgate.toml`, else defaults.
    ///
    /// A file that exists but does not load is an error rather than a silent fallback.
    pub fn load() -> ConfigResult<Self> {
        match Self::discover_path() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    fn discover_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        local.exists().then_some(local)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        let gates = &self.gates;
        if !(0.0..=100.0).contains(&gates.pass_threshold) {
            return Err(ConfigError::Validation(format!(
                "gates.pass_threshold must be within 0..=100, got {}",
                gates.pass_threshold
            )));
        }
        if !(0.0..=1.0).contains(&gates.marginal_ratio) {
            return Err(ConfigError::Validation(format!(
                "gates.marginal_ratio must be within 0..=1, got {}",
                gates.marginal_ratio
            )));
        }
        if gates.default_rule_weight <= 0.0 {
            return Err(ConfigError::Validation("gates.default_rule_weight must be positive".to_string()));
        }
        if gates.decision_options.is_empty() {
            return Err(ConfigError::Validation("gates.decision_options must not be empty".to_string()));
        }
        if !matches!(gates.gate_type.as_str(), "automated" | "human") {
            return Err(ConfigError::Validation(format!(
                "gates.gate_type must be 'automated' or 'human', got '{}'",
                gates.gate_type
            )));
        }
        if self.orchestrator.default_agent_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "orchestrator.default_agent_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
