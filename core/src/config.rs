use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::{cli::ConfigArgs, screen::ScreenOptions, session, socket::SocketOptions};

/// Runtime configuration resolved from defaults, file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the REST API.
    pub api_url: Url,
    /// Real-time socket endpoint.
    pub socket_url: Url,
    /// Location of the persisted session.
    pub session_file: PathBuf,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// Conversation refresh interval while the socket is down.
    pub poll_interval: Duration,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    api: FileApi,
    #[serde(default)]
    socket: FileSocket,
    #[serde(default)]
    polling: FilePolling,
    #[serde(default)]
    session: FileSession,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize)]
struct FileApi {
    #[serde(default = "default_api_url")]
    base_url: String,
    #[serde(default = "default_socket_url")]
    socket_url: String,
}

#[derive(Deserialize)]
struct FileSocket {
    #[serde(default = "default_reconnect_attempts")]
    reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    reconnect_delay_ms: u64,
}

#[derive(Deserialize)]
struct FilePolling {
    #[serde(default = "default_poll_interval_ms")]
    interval_ms: u64,
}

#[derive(Deserialize, Default)]
struct FileSession {
    #[serde(default)]
    file: Option<PathBuf>,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_api_url() -> String {
    "http://127.0.0.1:3000".into()
}

fn default_socket_url() -> String {
    "ws://127.0.0.1:3000/socket".into()
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_logging() -> bool {
    true
}

impl Default for FileApi {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            socket_url: default_socket_url(),
        }
    }
}

impl Default for FileSocket {
    fn default() -> Self {
        Self {
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Default for FilePolling {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(args: &ConfigArgs) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = args
            .config
            .clone()
            .or_else(|| std::env::var("EVCHAT_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/evchat.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };

        let mut api_url = file_cfg.api.base_url;
        let mut socket_url = file_cfg.api.socket_url;
        let mut session_file = file_cfg.session.file;
        let mut logging = file_cfg.logging.enabled;

        // environment overrides
        if let Ok(v) = std::env::var("EVCHAT_API_URL") {
            api_url = v;
        }
        if let Ok(v) = std::env::var("EVCHAT_SOCKET_URL") {
            socket_url = v;
        }
        if let Ok(v) = std::env::var("EVCHAT_SESSION_FILE") {
            session_file = Some(PathBuf::from(v));
        }
        if let Ok(l) = std::env::var("EVCHAT_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }

        // CLI overrides
        if let Some(v) = &args.api_url {
            api_url = v.clone();
        }
        if let Some(v) = &args.socket_url {
            socket_url = v.clone();
        }
        if let Some(v) = &args.session_file {
            session_file = Some(v.clone());
        }
        if let Some(l) = args.logging {
            logging = l;
        }

        let api_url = Url::parse(&api_url).context("invalid api url")?;
        if !matches!(api_url.scheme(), "http" | "https") {
            anyhow::bail!("invalid_api_scheme");
        }
        let socket_url = Url::parse(&socket_url).context("invalid socket url")?;
        if !matches!(socket_url.scheme(), "ws" | "wss") {
            anyhow::bail!("invalid_socket_scheme");
        }
        if file_cfg.socket.reconnect_attempts == 0 {
            anyhow::bail!("invalid_reconnect_attempts");
        }
        if file_cfg.socket.reconnect_delay_ms == 0 || file_cfg.polling.interval_ms == 0 {
            anyhow::bail!("invalid_interval");
        }

        Ok(Self {
            api_url,
            socket_url,
            session_file: session_file.unwrap_or_else(session::default_session_file),
            reconnect_attempts: file_cfg.socket.reconnect_attempts,
            reconnect_delay: Duration::from_millis(file_cfg.socket.reconnect_delay_ms),
            poll_interval: Duration::from_millis(file_cfg.polling.interval_ms),
            logging_enabled: logging,
        })
    }

    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            url: self.socket_url.to_string(),
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay: self.reconnect_delay,
        }
    }

    pub fn screen_options(&self) -> ScreenOptions {
        ScreenOptions {
            socket: self.socket_options(),
            poll_interval: self.poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        for key in [
            "EVCHAT_CONFIG",
            "EVCHAT_API_URL",
            "EVCHAT_SOCKET_URL",
            "EVCHAT_SESSION_FILE",
            "EVCHAT_LOGGING",
        ] {
            std::env::remove_var(key);
        }
    }

    fn args_for(contents: &str) -> (tempfile::TempDir, ConfigArgs) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evchat.toml");
        fs::write(&path, contents).unwrap();
        let args = ConfigArgs {
            config: Some(path),
            ..Default::default()
        };
        (dir, args)
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let (_dir, args) = args_for(
            "[api]\nbase_url=\"https://api.evmarket.vn\"\nsocket_url=\"wss://api.evmarket.vn/socket\"\n\
             [socket]\nreconnect_attempts=3\nreconnect_delay_ms=500\n\
             [polling]\ninterval_ms=4000\n[logging]\nenabled=false\n",
        );
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.api_url.as_str(), "https://api.evmarket.vn/");
        assert_eq!(cfg.socket_url.scheme(), "wss");
        assert_eq!(cfg.reconnect_attempts, 3);
        assert_eq!(cfg.reconnect_delay, Duration::from_millis(500));
        assert_eq!(cfg.poll_interval, Duration::from_secs(4));
        assert!(!cfg.logging_enabled);
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let (_dir, args) = args_for("");
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.api_url.as_str(), "http://127.0.0.1:3000/");
        assert_eq!(cfg.reconnect_attempts, 5);
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(2));
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
        assert!(cfg.logging_enabled);
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let (_dir, mut args) = args_for("[api]\nbase_url=\"http://file:1\"\n");
        std::env::set_var("EVCHAT_API_URL", "http://env:2");
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.api_url.as_str(), "http://env:2/");
        args.api_url = Some("http://cli:3".into());
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.api_url.as_str(), "http://cli:3/");
        std::env::remove_var("EVCHAT_API_URL");
    }

    #[test]
    #[serial]
    fn wrong_schemes_fail() {
        clear_env();
        let (_dir, args) = args_for("[api]\nsocket_url=\"http://127.0.0.1/socket\"\n");
        assert!(Config::load(&args).is_err());
        let (_dir, args) = args_for("[api]\nbase_url=\"ftp://127.0.0.1\"\n");
        assert!(Config::load(&args).is_err());
    }

    #[test]
    #[serial]
    fn zero_attempts_fail() {
        clear_env();
        let (_dir, args) = args_for("[socket]\nreconnect_attempts=0\n");
        assert!(Config::load(&args).is_err());
        let (_dir, args) = args_for("[polling]\ninterval_ms=0\n");
        assert!(Config::load(&args).is_err());
    }

    #[test]
    #[serial]
    fn session_file_and_logging_overrides() {
        clear_env();
        let (_dir, mut args) = args_for("[session]\nfile=\"/tmp/from-file.json\"\n");
        std::env::set_var("EVCHAT_LOGGING", "false");
        args.session_file = Some(PathBuf::from("/tmp/from-cli.json"));
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.session_file, PathBuf::from("/tmp/from-cli.json"));
        assert!(!cfg.logging_enabled);
        std::env::remove_var("EVCHAT_LOGGING");
    }
}
