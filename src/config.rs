//! Store configuration: durability root and collection naming.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Transience;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for collection snapshots. `None` keeps the store in
    /// memory.
    pub data_dir: Option<PathBuf>,
    /// Fsync snapshot files before they replace the previous snapshot.
    pub sync_writes: bool,
    /// Collection that holds settings documents.
    pub settings_collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            sync_writes: true,
            settings_collection: "settings".to_string(),
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn transience(&self) -> Transience {
        match self {
            ConfigError::Parse { .. } => Transience::Permanent,
            ConfigError::Read { .. } | ConfigError::Write { .. } => Transience::Unknown,
        }
    }
}

pub fn load(path: &Path) -> Result<StoreConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `path`, falling back to defaults when it is absent or broken. A
/// broken file is reported and left in place.
pub fn load_or_default(path: &Path) -> StoreConfig {
    if !path.exists() {
        return StoreConfig::default();
    }
    match load(path) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("config load failed, using defaults: {err}");
            StoreConfig::default()
        }
    }
}

pub fn write_config(path: &Path, config: &StoreConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|err| ConfigError::Write {
            path: path.to_path_buf(),
            reason: format!("failed to create {}: {err}", dir.display()),
        })?;
    }
    let contents = toml::to_string_pretty(config).map_err(|err| ConfigError::Write {
        path: path.to_path_buf(),
        reason: format!("failed to render config: {err}"),
    })?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let dir = path.parent().ok_or_else(|| ConfigError::Write {
        path: path.to_path_buf(),
        reason: "config path missing parent directory".to_string(),
    })?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|err| ConfigError::Write {
        path: path.to_path_buf(),
        reason: format!("failed to create temp file in {}: {err}", dir.display()),
    })?;
    fs::write(temp.path(), data).map_err(|err| ConfigError::Write {
        path: path.to_path_buf(),
        reason: format!("failed to write config temp file: {err}"),
    })?;
    temp.persist(path).map_err(|err| ConfigError::Write {
        path: path.to_path_buf(),
        reason: format!("failed to persist config: {err}"),
    })?;
    Ok(())
}
