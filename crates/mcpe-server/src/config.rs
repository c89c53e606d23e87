//! Server configuration: TOML file + CLI overrides.

use mcpe_core::{McpeError, McpeResult};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub attach: AttachSection,
    #[serde(default)]
    pub exec: ExecSection,
    #[serde(default)]
    pub lifecycle: LifecycleSection,
}

/// `[server]`: where the game server lives and what it writes.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bin")]
    pub bin: String,
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_data")]
    pub data: String,
    #[serde(default = "default_link")]
    pub link: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_true")]
    pub prepare: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bin: default_bin(),
            program: default_program(),
            data: default_data(),
            link: default_link(),
            log_file: default_log_file(),
            prepare: true,
        }
    }
}

/// `[attach]`: session transports.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachSection {
    #[serde(default)]
    pub socket: Option<String>,
    #[serde(default)]
    pub websocket: Option<String>,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for AttachSection {
    fn default() -> Self {
        Self {
            socket: None,
            websocket: None,
            token: String::new(),
            queue_capacity: default_queue_capacity(),
            console: true,
        }
    }
}

/// `[exec]`: result correlation timing, all in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecSection {
    #[serde(default = "default_max_timeout")]
    pub max_timeout_ms: u64,
    #[serde(default = "default_result_window")]
    pub result_window_ms: u64,
    #[serde(default = "default_result_cache")]
    pub result_cache_ms: u64,
}

impl Default for ExecSection {
    fn default() -> Self {
        Self {
            max_timeout_ms: default_max_timeout(),
            result_window_ms: default_result_window(),
            result_cache_ms: default_result_cache(),
        }
    }
}

/// `[lifecycle]`
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleSection {
    #[serde(default)]
    pub restart_on_exit: bool,
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            restart_on_exit: false,
            stop_grace_ms: default_stop_grace(),
        }
    }
}

fn default_bin() -> String {
    "bin".to_string()
}
fn default_program() -> String {
    "server".to_string()
}
fn default_data() -> String {
    "data".to_string()
}
fn default_link() -> String {
    "games".to_string()
}
fn default_log_file() -> String {
    "mcpe.log".to_string()
}
fn default_queue_capacity() -> usize {
    256
}
fn default_max_timeout() -> u64 {
    60_000
}
fn default_result_window() -> u64 {
    5_000
}
fn default_result_cache() -> u64 {
    30_000
}
fn default_stop_grace() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}

/// Values given on the command line; `None` keeps the file's value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bin: Option<String>,
    pub data: Option<String>,
    pub link: Option<String>,
    pub log_file: Option<String>,
    pub socket: Option<String>,
    pub websocket: Option<String>,
    pub token: Option<String>,
    pub no_console: bool,
    pub restart_on_exit: bool,
}

/// Resolved server configuration (all paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bin_dir: PathBuf,
    pub program: String,
    pub data_dir: PathBuf,
    pub link_dir: PathBuf,
    pub log_file: PathBuf,
    pub prepare: bool,
    pub socket: Option<PathBuf>,
    pub websocket: Option<SocketAddr>,
    /// Empty means "generate one at startup".
    pub token: String,
    pub queue_capacity: usize,
    pub console: bool,
    pub max_timeout: Duration,
    pub result_window: Duration,
    pub result_cache: Duration,
    pub restart_on_exit: bool,
    pub stop_grace: Duration,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: Overrides) -> McpeResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| McpeError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, cli)
    }

    fn resolve(file: ConfigFile, cli: Overrides) -> McpeResult<Self> {
        let server = file.server;
        let attach = file.attach;

        let websocket = cli
            .websocket
            .or(attach.websocket)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<SocketAddr>()
                    .map_err(|e| McpeError::Config(format!("invalid websocket address {s:?}: {e}")))
            })
            .transpose()?;

        if attach.queue_capacity == 0 {
            return Err(McpeError::Config("attach.queue_capacity must be at least 1".into()));
        }

        Ok(Self {
            bin_dir: absolute(expand_tilde_str(&cli.bin.unwrap_or(server.bin)))?,
            program: server.program,
            data_dir: absolute(expand_tilde_str(&cli.data.unwrap_or(server.data)))?,
            link_dir: absolute(expand_tilde_str(&cli.link.unwrap_or(server.link)))?,
            log_file: absolute(expand_tilde_str(&cli.log_file.unwrap_or(server.log_file)))?,
            prepare: server.prepare,
            socket: cli
                .socket
                .or(attach.socket)
                .filter(|s| !s.is_empty())
                .map(|s| expand_tilde_str(&s)),
            websocket,
            token: cli.token.unwrap_or(attach.token),
            queue_capacity: attach.queue_capacity,
            console: attach.console && !cli.no_console,
            max_timeout: Duration::from_millis(file.exec.max_timeout_ms),
            result_window: Duration::from_millis(file.exec.result_window_ms),
            result_cache: Duration::from_millis(file.exec.result_cache_ms),
            restart_on_exit: file.lifecycle.restart_on_exit || cli.restart_on_exit,
            stop_grace: Duration::from_millis(file.lifecycle.stop_grace_ms),
        })
    }
}

/// Anchor a relative path at the supervisor's working directory. The server
/// process runs inside `data`, so it must never see a relative path.
fn absolute(path: PathBuf) -> McpeResult<PathBuf> {
    std::path::absolute(&path)
        .map_err(|e| McpeError::Config(format!("cannot resolve {}: {e}", path.display())))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
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
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServerConfig::load(Some(&dir.path().join("none.toml")), Overrides::default())
            .unwrap();
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(cfg.bin_dir, cwd.join("bin"));
        assert_eq!(cfg.program, "server");
        assert_eq!(cfg.data_dir, cwd.join("data"));
        assert_eq!(cfg.link_dir, cwd.join("games"));
        assert_eq!(cfg.log_file, cwd.join("mcpe.log"));
        assert_eq!(cfg.queue_capacity, 256);
        assert!(cfg.console);
        assert!(cfg.prepare);
        assert!(!cfg.restart_on_exit);
        assert_eq!(cfg.stop_grace, Duration::from_secs(10));
        assert_eq!(cfg.socket, None);
        assert_eq!(cfg.websocket, None);
    }

    #[test]
    fn file_values_and_cli_overrides_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpe.toml");
        std::fs::write(
            &path,
            r#"
[server]
bin = "/opt/mcpe/bin"
data = "/srv/mcpe"

[attach]
socket = "/run/mcpe.sock"
websocket = "127.0.0.1:8080"
queue_capacity = 16

[exec]
result_window_ms = 250

[lifecycle]
restart_on_exit = true
"#,
        )
        .unwrap();

        let cfg = ServerConfig::load(
            Some(&path),
            Overrides {
                data: Some("/tmp/data".into()),
                no_console: true,
                ..Overrides::default()
            },
        )
        .unwrap();

        assert_eq!(cfg.bin_dir, PathBuf::from("/opt/mcpe/bin"));
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/data"));
        assert_eq!(cfg.socket, Some(PathBuf::from("/run/mcpe.sock")));
        assert_eq!(cfg.websocket, Some("127.0.0.1:8080".parse().unwrap()));
        assert_eq!(cfg.queue_capacity, 16);
        assert_eq!(cfg.result_window, Duration::from_millis(250));
        assert!(!cfg.console);
        assert!(cfg.restart_on_exit);
    }

    #[test]
    fn rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpe.toml");

        std::fs::write(&path, "[attach]\nwebsocket = \"not an address\"\n").unwrap();
        let err = ServerConfig::load(Some(&path), Overrides::default()).unwrap_err();
        assert!(matches!(err, McpeError::Config(_)));

        std::fs::write(&path, "[attach]\nqueue_capacity = 0\n").unwrap();
        assert!(ServerConfig::load(Some(&path), Overrides::default()).is_err());

        std::fs::write(&path, "[server\n").unwrap();
        assert!(ServerConfig::load(Some(&path), Overrides::default()).is_err());
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde_str("~/mcpe.sock"), home.join("mcpe.sock"));
        }
        assert_eq!(expand_tilde_str("/abs"), PathBuf::from("/abs"));
    }
}
