use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Lowest accepted pause between two sampling cycles.
pub const MIN_CYCLE_DELAY_FLOOR_MS: u64 = 50;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub stream_listen: String,
    pub poll_listen: String,
    pub poll_path: String,
    pub min_cycle_delay_ms: u64,
    pub send_timeout_ms: u64,
    pub metrics_listen: Option<String>,
    pub source: SourceKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Auto,
    Sysinfo,
    LibreHardwareMonitor,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_listen: default_stream_listen(),
            poll_listen: default_poll_listen(),
            poll_path: default_poll_path(),
            min_cycle_delay_ms: default_min_cycle_delay_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            metrics_listen: None,
            source: SourceKind::Auto,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_listen("stream_listen", &self.stream_listen)?;
        validate_listen("poll_listen", &self.poll_listen)?;
        if let Some(metrics_listen) = &self.metrics_listen {
            validate_listen("metrics_listen", metrics_listen)?;
        }

        if !self.poll_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "poll_path must start with '/'".to_string(),
            ));
        }
        if self.min_cycle_delay_ms < MIN_CYCLE_DELAY_FLOOR_MS {
            return Err(ConfigError::Validation(format!(
                "min_cycle_delay_ms must be >= {MIN_CYCLE_DELAY_FLOOR_MS}"
            )));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "send_timeout_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn min_cycle_delay(&self) -> Duration {
        Duration::from_millis(self.min_cycle_delay_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_listen(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{field} is required")));
    }
    let port = match SocketAddr::from_str(value) {
        Ok(addr) => addr.port(),
        Err(_) => match value.rsplit_once(':') {
            Some((host, port)) if is_host_name(host) => port.parse::<u16>().map_err(|_| {
                ConfigError::Validation(format!("{field} has an invalid port: {port}"))
            })?,
            _ => {
                return Err(ConfigError::Validation(format!(
                    "{field} must be a host:port address"
                )))
            }
        },
    };
    if port == 0 {
        return Err(ConfigError::Validation(format!(
            "{field} must use a fixed port"
        )));
    }
    Ok(())
}

/// DNS-style host name such as `localhost` or `monitor.lan`.
fn is_host_name(host: &str) -> bool {
    !host.is_empty()
        && host.split('.').all(|label| {
            !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn default_stream_listen() -> String {
    "127.0.0.1:42069".to_string()
}

fn default_poll_listen() -> String {
    "127.0.0.1:6969".to_string()
}

fn default_poll_path() -> String {
    "/monitor".to_string()
}

const fn default_min_cycle_delay_ms() -> u64 {
    250
}

const fn default_send_timeout_ms() -> u64 {
    500
}
