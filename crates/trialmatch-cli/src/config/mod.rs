//! Configuration loading for the trialmatch CLI.
//! Reads trialmatch.toml from the current directory, the path in the
//! TRIALMATCH_CONFIG env var, or the path given with `--config`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use trialmatch_common::MatcherConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// `[scoring]`, `[ranking]`, `[explain]` and `[execution]` tables.
    #[serde(flatten)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String { "trialmatch=info,warn".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}


impl Config {
    /// Config path: `--config`, then TRIALMATCH_CONFIG, then ./trialmatch.toml.
    pub fn resolve_path(cli: Option<&Path>) -> PathBuf {
        match cli {
            Some(path) => path.to_path_buf(),
            None => std::env::var("TRIALMATCH_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("trialmatch.toml")),
        }
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.matcher.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`. `Ok(None)` when the file does not
    /// exist; the caller falls back to defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(anyhow::anyhow!("Failed to read config {}: {}", path.display(), e)),
        };
        let config = Self::from_toml_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))?;
        Ok(Some(config))
    }
}
