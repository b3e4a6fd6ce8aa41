//! Daemon configuration loaded from a JSON file.
//!
//! # Responsibility
//! - Provide defaults for every setting so an absent file is a valid setup.
//! - Validate settings once, before anything is started.
//!
//! # Invariants
//! - An enabled scheduler always has a period greater than zero.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DATABASE_FILE: &str = "coffer.db";
const DEFAULT_SCHEDULER_PERIOD_SECS: u64 = 10;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// SQLite database file.
    pub database: PathBuf,
    pub scheduler: SchedulerConfig,
    pub auth: AuthConfig,
}

/// Pruning scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Sweep period in seconds.
    pub period: u64,
}

/// Access gate settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Static bearer token accepted by the API. `None` rejects every request
    /// unless authentication is disabled explicitly.
    pub token: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE_FILE),
            scheduler: SchedulerConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period: DEFAULT_SCHEDULER_PERIOD_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    InvalidSchedulerPeriod,
    EmptyAuthToken,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config: {err}"),
            Self::InvalidSchedulerPeriod => {
                write!(f, "scheduler.period must be greater than zero when enabled")
            }
            Self::EmptyAuthToken => write!(f, "auth.token must not be empty when set"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::InvalidSchedulerPeriod | Self::EmptyAuthToken => None,
        }
    }
}

impl VaultConfig {
    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parses and validates JSON config text.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.enabled && self.scheduler.period == 0 {
            return Err(ConfigError::InvalidSchedulerPeriod);
        }
        if self
            .auth
            .token
            .as_deref()
            .is_some_and(|token| token.trim().is_empty())
        {
            return Err(ConfigError::EmptyAuthToken);
        }
        Ok(())
    }
}
