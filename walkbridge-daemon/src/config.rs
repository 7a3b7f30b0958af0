//! Load config from file, environment and command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use walkbridge_core::{ChannelError, Channels, RelayOptions, Target};

/// Bridge configuration. File: ~/.config/walkbridge/config.toml or /etc/walkbridge/config.toml.
/// Env overrides: WALKBRIDGE_* (see `apply_env`). Command-line flags override both.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// File the emulator script writes requests to.
    #[serde(default = "default_request_path")]
    pub request_path: PathBuf,
    /// File this bridge writes responses to.
    #[serde(default = "default_response_path")]
    pub response_path: PathBuf,
    /// Seconds between polls of the request file (default 0.3).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,
    /// BLE address of the peripheral. Scans when absent.
    #[serde(default)]
    pub device_address: Option<String>,
    /// BLE name to scan for when no address is set.
    #[serde(default)]
    pub device_name: Option<String>,
    /// GATT characteristic UUID to write requests to.
    #[serde(default)]
    pub write_uuid: Option<String>,
    /// GATT characteristic UUID replies are notified on.
    #[serde(default)]
    pub notify_uuid: Option<String>,
    /// Seconds to wait for the reply notification (default 3.0).
    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,
    /// Seconds to scan when resolving the device (default 2.0).
    #[serde(default = "default_scan")]
    pub scan_secs: f64,
    /// Seconds to back off after a failed cycle (default 1.0).
    #[serde(default = "default_fault_backoff")]
    pub fault_backoff_secs: f64,
    /// Whiten reply bytes before writing the response file.
    #[serde(default)]
    pub whiten: bool,
    /// Unwhiten request bytes read from the request file.
    #[serde(default)]
    pub unwhiten: bool,
    /// Debug-level logging.
    #[serde(default)]
    pub debug: bool,
}

fn default_request_path() -> PathBuf {
    PathBuf::from("./drastic_request.bin")
}
fn default_response_path() -> PathBuf {
    PathBuf::from("./drastic_response.bin")
}
fn default_poll_interval() -> f64 {
    0.3
}
fn default_timeout() -> f64 {
    3.0
}
fn default_scan() -> f64 {
    2.0
}
fn default_fault_backoff() -> f64 {
    1.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_path: default_request_path(),
            response_path: default_response_path(),
            poll_interval_secs: default_poll_interval(),
            device_address: None,
            device_name: None,
            write_uuid: None,
            notify_uuid: None,
            timeout_secs: default_timeout(),
            scan_secs: default_scan(),
            fault_backoff_secs: default_fault_backoff(),
            whiten: false,
            unwhiten: false,
            debug: false,
        }
    }
}

/// Invalid configuration, reported at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Channels(#[from] ChannelError),
    #[error("{name} must be a positive number of seconds, got {value}")]
    Interval { name: &'static str, value: f64 },
    #[error("fault backoff ({backoff}s) must be longer than the poll interval ({poll}s)")]
    Backoff { backoff: f64, poll: f64 },
}

impl Config {
    pub fn target(&self) -> Target {
        Target::new(self.device_address.clone(), self.device_name.clone())
    }

    /// Channels are only needed (and only checked) when a device is configured.
    pub fn channels(&self) -> Result<Option<Channels>, ConfigError> {
        if !self.target().is_configured() {
            return Ok(None);
        }
        let c = Channels::from_parts(self.write_uuid.as_deref(), self.notify_uuid.as_deref())?;
        Ok(Some(c))
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            unwhiten_inbound: self.unwhiten,
            whiten_outbound: self.whiten,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_secs_f64(self.scan_secs)
    }

    pub fn fault_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.fault_backoff_secs)
    }

    /// Check intervals and channel ids before the loop starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("timeout_secs", self.timeout_secs),
            ("scan_secs", self.scan_secs),
            ("fault_backoff_secs", self.fault_backoff_secs),
        ] {
            // try_from also rejects values too large for a Duration
            let ok = value > 0.0 && Duration::try_from_secs_f64(value).is_ok();
            if !ok {
                return Err(ConfigError::Interval { name, value });
            }
        }
        if self.fault_backoff_secs <= self.poll_interval_secs {
            return Err(ConfigError::Backoff {
                backoff: self.fault_backoff_secs,
                poll: self.poll_interval_secs,
            });
        }
        self.channels()?;
        Ok(())
    }

    /// Apply WALKBRIDGE_* overrides; unparsable numbers are ignored.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(s) = var("WALKBRIDGE_REQUEST_FILE") {
            self.request_path = PathBuf::from(s);
        }
        if let Some(s) = var("WALKBRIDGE_RESPONSE_FILE") {
            self.response_path = PathBuf::from(s);
        }
        if let Some(v) = var("WALKBRIDGE_POLL_INTERVAL").and_then(|s| s.parse().ok()) {
            self.poll_interval_secs = v;
        }
        if let Some(s) = var("WALKBRIDGE_BLE_ADDRESS") {
            self.device_address = Some(s);
        }
        if let Some(s) = var("WALKBRIDGE_BLE_NAME") {
            self.device_name = Some(s);
        }
        if let Some(s) = var("WALKBRIDGE_WRITE_UUID") {
            self.write_uuid = Some(s);
        }
        if let Some(s) = var("WALKBRIDGE_NOTIFY_UUID") {
            self.notify_uuid = Some(s);
        }
        if let Some(v) = var("WALKBRIDGE_BLE_TIMEOUT").and_then(|s| s.parse().ok()) {
            self.timeout_secs = v;
        }
        if let Some(v) = var("WALKBRIDGE_SCAN_WINDOW").and_then(|s| s.parse().ok()) {
            self.scan_secs = v;
        }
        if let Some(v) = var("WALKBRIDGE_FAULT_BACKOFF").and_then(|s| s.parse().ok()) {
            self.fault_backoff_secs = v;
        }
    }
}

/// Load config: merge default, then config file (explicit path or first found), then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match explicit {
        Some(p) => read_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => read_file(&p)?,
            None => Config::default(),
        },
    };
    c.apply_env(|k| std::env::var(k).ok());
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/walkbridge/config.toml"));
    }
    out.push(PathBuf::from("/etc/walkbridge/config.toml"));
    out
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
