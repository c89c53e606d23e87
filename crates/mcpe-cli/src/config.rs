//! Client configuration at `~/.mcpe/config.toml`.
//!
//! CLI flags always override config file values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,
}

/// Default connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultConfig {
    /// Attach socket of the supervisor.
    #[serde(default = "default_socket")]
    pub socket: String,

    /// Timeout for `exec` when `--timeout` is not given.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_socket() -> String {
    "mcpe.sock".to_string()
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// `~/.mcpe/config.toml`, or a relative fallback without a home directory.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".mcpe"))
            .unwrap_or_else(|| PathBuf::from(".mcpe"))
            .join("config.toml")
    }
}

/// Expand a leading `~/` in a socket path.
pub fn expand_tilde(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.default.socket, "mcpe.sock");
        assert_eq!(cfg.default.timeout_ms, 1000);
    }

    #[test]
    fn reads_default_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[default]\nsocket = \"/run/mcpe.sock\"\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.default.socket, "/run/mcpe.sock");
        assert_eq!(cfg.default.timeout_ms, 1000);
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[default\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn default_path_ends_in_mcpe_dir() {
        assert!(Config::default_path().ends_with(".mcpe/config.toml"));
    }
}
