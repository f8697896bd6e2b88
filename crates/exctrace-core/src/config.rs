//! Project configuration (`.exctrace/config.yaml`, spec §6).

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ResolutionMode;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub resolution_mode: ResolutionMode,
    pub exclude: Vec<String>,
    pub handled_base_classes: Vec<String>,
    pub async_boundaries: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            resolution_mode: ResolutionMode::Default,
            exclude: default_excludes(),
            handled_base_classes: Vec::new(),
            async_boundaries: Vec::new(),
        }
    }
}

fn default_excludes() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/venv/**".to_string(),
        "**/.venv/**".to_string(),
    ]
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {message}")]
    Io { path: String, message: String },
    #[error("malformed config at {path}: {message}")]
    Parse { path: String, message: String },
}

impl Config {
    /// Load from `<project_dir>/.exctrace/config.yaml`. Missing file yields
    /// defaults (no config is not an error); a present-but-malformed file is
    /// a fatal [`ConfigError`] raised before analysis begins (spec §7).
    pub fn load(project_dir: &Path) -> Result<Config, ConfigError> {
        let path = project_dir.join(".exctrace").join("config.yaml");
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Config::parse(&contents, &path.display().to_string())
    }

    pub fn parse(contents: &str, path_label: &str) -> Result<Config, ConfigError> {
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: path_label.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.resolution_mode, ResolutionMode::Default);
        assert!(!cfg.exclude.is_empty());
    }

    #[test]
    fn parses_all_documented_keys() {
        let yaml = r#"
resolution_mode: strict
exclude: ["**/tests/**"]
handled_base_classes: ["fwk.BaseError"]
async_boundaries: ["asyncio.create_task"]
"#;
        let cfg = Config::parse(yaml, "inline").unwrap();
        assert_eq!(cfg.resolution_mode, ResolutionMode::Strict);
        assert_eq!(cfg.exclude, vec!["**/tests/**".to_string()]);
        assert_eq!(cfg.handled_base_classes, vec!["fwk.BaseError".to_string()]);
        assert_eq!(cfg.async_boundaries, vec!["asyncio.create_task".to_string()]);
    }

    #[test]
    fn malformed_config_is_fatal_error_not_default() {
        let err = Config::parse("resolution_mode: [not, a, scalar]", "inline").unwrap_err();
        match err {
            ConfigError::Parse { .. } => {}
            _ => panic!("expected parse error"),
        }
    }

    #[test]
    fn partial_config_fills_remaining_with_defaults() {
        let cfg = Config::parse("resolution_mode: aggressive", "inline").unwrap();
        assert_eq!(cfg.resolution_mode, ResolutionMode::Aggressive);
        assert!(cfg.handled_base_classes.is_empty());
    }
}
