//! Engine configuration, read from TOML.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::render::Delimiters;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub delimiters: Delimiters,
    pub templates_dir: PathBuf,
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delimiters: Delimiters::default(),
            templates_dir: PathBuf::from("templates"),
            log_filter: "warn".to_string(),
        }
    }
}

impl EngineConfig {
    /// Missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.delimiters.check().map_err(EngineError::Config)?;
        Ok(config)
    }
}
