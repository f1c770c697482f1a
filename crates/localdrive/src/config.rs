use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the file-serving core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// File extensions hidden from directory listings
    #[serde(default = "default_hidden_extensions")]
    pub hidden_extensions: Vec<String>,

    /// Entry names hidden from directory listings
    #[serde(default = "default_hidden_names")]
    pub hidden_names: Vec<String>,

    /// Maximum upload size in bytes (0 means unlimited)
    #[serde(default)]
    pub max_upload_size: u64,

    /// How long `stop()` waits for the serving thread before forcing it
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Extra wait after a forced stop before the thread is detached
    #[serde(default = "default_force_stop_grace_ms")]
    pub force_stop_grace_ms: u64,
}

fn default_hidden_extensions() -> Vec<String> {
    vec![".py".to_string(), ".pyc".to_string(), ".pyo".to_string()]
}

fn default_hidden_names() -> Vec<String> {
    vec!["__pycache__".to_string(), "static".to_string()]
}

fn default_stop_timeout_ms() -> u64 {
    2000
}

fn default_force_stop_grace_ms() -> u64 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hidden_extensions: default_hidden_extensions(),
            hidden_names: default_hidden_names(),
            max_upload_size: 0,
            stop_timeout_ms: default_stop_timeout_ms(),
            force_stop_grace_ms: default_force_stop_grace_ms(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Check whether a listing entry should be hidden.
    ///
    /// Dotfiles are always hidden; names and extensions come from config.
    pub fn is_hidden(&self, name: &str) -> bool {
        if name.starts_with('.') {
            return true;
        }
        if self.hidden_names.iter().any(|n| n == name) {
            return true;
        }
        let lower = name.to_ascii_lowercase();
        self.hidden_extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn force_stop_grace(&self) -> Duration {
        Duration::from_millis(self.force_stop_grace_ms)
    }

    pub fn upload_limit(&self) -> Option<u64> {
        (self.max_upload_size > 0).then_some(self.max_upload_size)
    }
}
