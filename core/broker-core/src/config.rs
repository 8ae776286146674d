//! Configuration loading and saving.
//!
//! The config file lives at `~/.workbook-broker/config.json`. Every field has
//! a default, so a partial file is fine and a missing file means defaults.

use std::io::Write;
use std::path::{Path, PathBuf};

use fs_err as fs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::canonical::DriveMapping;
use crate::error::{BrokerError, Result};
use crate::pool::{CloseAllConfig, PoolConfig};

/// Broker-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Keep the application from prompting in sessions the broker launches.
    pub suppress_alerts: bool,
    /// Show sessions the broker launches.
    pub visible: bool,
    /// Network drives, for matching `Z:/x` against `//server/share/x`.
    pub drive_mappings: Vec<DriveMapping>,
    pub close_all: CloseAllConfig,
    pub log: LogConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            suppress_alerts: true,
            visible: false,
            drive_mappings: Vec::new(),
            close_all: CloseAllConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub(crate) fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            visible: self.visible,
            suppress_alerts: self.suppress_alerts,
            close_all: self.close_all.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `broker_core=debug`.
    pub level: String,
    /// Rolling log directory. Logs go to stderr when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

/// Returns the broker's data directory (~/.workbook-broker).
pub fn get_broker_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".workbook-broker"))
}

/// Returns the path to the config file.
pub fn get_config_path() -> Option<PathBuf> {
    get_broker_dir().map(|d| d.join("config.json"))
}

/// Loads the config, falling back to defaults when the file is missing or broken.
pub fn load_config() -> BrokerConfig {
    let Some(path) = get_config_path() else {
        return BrokerConfig::default();
    };
    if !path.exists() {
        return BrokerConfig::default();
    }
    match load_from(&path) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "Ignoring unreadable broker config");
            BrokerConfig::default()
        }
    }
}

/// Loads the config at `path`, failing on unreadable or malformed files.
pub fn load_from(path: &Path) -> Result<BrokerConfig> {
    let content = fs::read_to_string(path).map_err(|source| BrokerError::Io {
        context: "read config".to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|e| BrokerError::ConfigMalformed {
        path: path.to_path_buf(),
        details: e.to_string(),
    })
}

/// Writes the config atomically (temp file + rename).
pub fn save_to(path: &Path, config: &BrokerConfig) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|source| BrokerError::Io {
        context: "create config dir".to_string(),
        source,
    })?;

    let content = serde_json::to_string_pretty(config).map_err(|e| BrokerError::ConfigMalformed {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|source| BrokerError::Io {
        context: "create temp config".to_string(),
        source,
    })?;
    tmp.write_all(content.as_bytes())
        .map_err(|source| BrokerError::Io {
            context: "write temp config".to_string(),
            source,
        })?;
    tmp.persist(path).map_err(|e| BrokerError::Io {
        context: "persist config".to_string(),
        source: e.error,
    })?;
    Ok(())
}
