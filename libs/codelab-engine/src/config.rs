/// Engine Configuration
///
/// Resolution order: explicit file, then `config/engine.json` when it
/// exists, then built-in defaults. Environment variables override
/// whatever the file supplied.
use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "config/engine.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interpreter binary used to spawn sessions.
    pub python_command: String,
    /// Directory where rendered figures are written.
    pub artifact_root: String,
    /// URL prefix prepended to stored artifact names.
    pub artifact_public_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            python_command: "python3".to_string(),
            artifact_root: "storage/visualizations".to_string(),
            artifact_public_prefix: "/storage/visualizations".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config from {}", path.display()))?;
        let mut config: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse engine config from {}", path.display()))?;
        config.apply_env_overrides();
        info!(path = %path.display(), "Loaded engine configuration");
        Ok(config)
    }

    /// Load `config/engine.json` when present, defaults otherwise.
    pub fn load_default() -> Result<Self> {
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load(DEFAULT_CONFIG_PATH)
        } else {
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(command) = env::var("CODELAB_PYTHON") {
            self.python_command = command;
        }
        if let Ok(root) = env::var("CODELAB_ARTIFACT_ROOT") {
            self.artifact_root = root;
        }
        if let Ok(prefix) = env::var("CODELAB_ARTIFACT_PREFIX") {
            self.artifact_public_prefix = prefix;
        }
    }
}
