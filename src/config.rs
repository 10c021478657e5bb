//! Engine configuration.
//!
//! Resolved from an optional TOML file layered over compiled defaults. Every
//! file field is optional so a file only needs to name what it overrides:
//!
//! ```toml
//! [negotiation]
//! reject_target = "pending"
//! expire_open_negotiations = true
//! max_cost = "5000.00 EGP"
//!
//! [storage]
//! path = "/var/lib/tasks/db"
//!
//! [logging]
//! filter = "task_negotiation=debug"
//! ```
use super::money::Money;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Where a rejected proposal sends the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectTarget {
    /// Back to the agent who reviewed it, ready for a fresh proposal.
    #[default]
    CostReview,
    /// Back to the open pool; the reviewing agent is forgotten.
    Pending,
}

/// Business knobs consumed by the state machine and the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiationPolicy {
    pub reject_target: RejectTarget,
    /// Allow a scheduled task to expire at any point before it is assigned,
    /// not only while it is still waiting for review.
    pub expire_open_negotiations: bool,
    /// Upper bound for proposals and counter-offers, same currency only.
    pub max_cost: Option<Money>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct EngineConfigFile {
    negotiation: NegotiationFileConfig,
    storage: StorageFileConfig,
    logging: LoggingFileConfig,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NegotiationFileConfig {
    reject_target: Option<RejectTarget>,
    expire_open_negotiations: Option<bool>,
    max_cost: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LoggingFileConfig {
    filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub policy: NegotiationPolicy,
    /// Directory of the sled database.
    pub db_path: PathBuf,
    /// `tracing` env-filter directive.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: NegotiationPolicy::default(),
            db_path: PathBuf::from("tasks.db"),
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads `path`; the file must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Like [`EngineConfig::load`] but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let file: EngineConfigFile = toml::from_str(contents)?;
        Self::resolve(file)
    }

    fn resolve(file: EngineConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_cost = file
            .negotiation
            .max_cost
            .map(|raw| {
                raw.parse::<Money>().map_err(|e| ConfigError::InvalidValue {
                    field: "negotiation.max_cost",
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        if max_cost.is_some_and(|m| !m.is_positive()) {
            return Err(ConfigError::InvalidValue {
                field: "negotiation.max_cost",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            policy: NegotiationPolicy {
                reject_target: file
                    .negotiation
                    .reject_target
                    .unwrap_or(defaults.policy.reject_target),
                expire_open_negotiations: file
                    .negotiation
                    .expire_open_negotiations
                    .unwrap_or(defaults.policy.expire_open_negotiations),
                max_cost,
            },
            db_path: file.storage.path.unwrap_or(defaults.db_path),
            log_filter: file.logging.filter.unwrap_or(defaults.log_filter),
        })
    }
}
