//! Configuration Loader
//!
//! Loads the app configuration from built-in defaults and optional JSON files.
//! Files are merged key by key, later sources overriding earlier ones.

use crate::config::provider::AppConfig;
use crate::error::{GlmError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    merged: Value,
}

impl ConfigLoader {
    /// Load built-in defaults, `.env`, then every config file that exists
    pub fn new() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut loader = Self::builtin()?;
        for path in Self::get_config_paths() {
            if path.exists() {
                loader.load_from_file(&path)?;
            }
        }
        Ok(loader)
    }

    /// Create a loader with a specific config file on top of the defaults
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self::builtin()?;
        loader.load_from_file(path)?;
        Ok(loader)
    }

    fn builtin() -> Result<Self> {
        let defaults = include_str!("../../defaults.json");
        let merged: Value = serde_json::from_str(defaults).map_err(|e| {
            GlmError::Config(format!("Failed to parse built-in defaults.json: {}", e))
        })?;
        Ok(Self { merged })
    }

    /// Get list of config paths to check
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(custom_path) = std::env::var("GLM_STREAM_CONFIG") {
            paths.push(PathBuf::from(custom_path));
        }

        paths.push(PathBuf::from("glm-stream.json"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("glm-stream").join("config.json"));
        }

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".glm-stream").join("config.json"));
        }

        paths
    }

    /// Merge configuration from a specific file
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GlmError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let overlay: Value = serde_json::from_str(&content).map_err(|e| {
            GlmError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), "merging config file");
        merge_json(&mut self.merged, overlay);
        Ok(())
    }

    /// Typed view of the merged configuration
    pub fn into_config(self) -> Result<AppConfig> {
        serde_json::from_value(self.merged)
            .map_err(|e| GlmError::Config(format!("Invalid configuration: {}", e)))
    }
}

/// Recursively merge `overlay` into `base`; objects merge, everything else replaces
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
