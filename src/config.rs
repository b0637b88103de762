/// Engine configuration
///
/// Priority: environment (`RELCORE__SECTION__KEY`) > config file > defaults.
/// Every field has a default, so an empty file or no file at all is valid.
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::DatabaseError;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "relcore.toml";
const ENV_PREFIX: &str = "RELCORE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Largest join region ordered by exhaustive dynamic programming
    #[serde(default = "default_dp_table_limit")]
    pub dp_table_limit: usize,
    /// Build sides up to this many rows use a hash join
    #[serde(default = "default_hash_build_row_budget")]
    pub hash_build_row_budget: u64,
    /// Smaller sides up to this many rows may use a nested-loop join
    #[serde(default = "default_nested_loop_row_threshold")]
    pub nested_loop_row_threshold: u64,
    /// Cost of emitting one row in the join cost model
    #[serde(default = "default_row_cost")]
    pub row_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsConfig {
    /// Statistics are recomputed once modifications exceed this share of rows
    #[serde(default = "default_staleness_ratio")]
    pub staleness_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Rows processed between two cancellation checks
    #[serde(default = "default_cancel_check_interval")]
    pub cancel_check_interval: usize,
}

const fn default_dp_table_limit() -> usize {
    10
}

const fn default_hash_build_row_budget() -> u64 {
    100_000
}

const fn default_nested_loop_row_threshold() -> u64 {
    64
}

const fn default_row_cost() -> f64 {
    1.0
}

const fn default_staleness_ratio() -> f64 {
    0.2
}

const fn default_cancel_check_interval() -> usize {
    1024
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            dp_table_limit: default_dp_table_limit(),
            hash_build_row_budget: default_hash_build_row_budget(),
            nested_loop_row_threshold: default_nested_loop_row_threshold(),
            row_cost: default_row_cost(),
        }
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            staleness_ratio: default_staleness_ratio(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            cancel_check_interval: default_cancel_check_interval(),
        }
    }
}

impl EngineConfig {
    /// Load from `path` (must exist) or from `./relcore.toml` (optional),
    /// then overlay `RELCORE__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, DatabaseError> {
        let mut builder = Config::builder();
        match path {
            Some(path) => {
                debug!(path = %path.display(), "loading config file");
                builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
            }
            None => {
                builder = builder.add_source(
                    File::with_name(DEFAULT_CONFIG_FILE)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text directly (no environment overlay)
    pub fn from_toml(text: &str) -> Result<Self, DatabaseError> {
        let config: Self = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DatabaseError> {
        let ratio = self.statistics.staleness_ratio;
        if !(ratio.is_finite() && ratio >= 0.0) {
            return Err(DatabaseError::Config(config::ConfigError::Message(format!(
                "statistics.staleness_ratio must be a non-negative number, got {ratio}"
            ))));
        }
        if self.execution.cancel_check_interval == 0 {
            return Err(DatabaseError::Config(config::ConfigError::Message(
                "execution.cancel_check_interval must be at least 1".to_string(),
            )));
        }
        Ok(())
    }
}
