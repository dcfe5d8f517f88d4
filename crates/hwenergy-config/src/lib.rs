//! Configuration of paired devices.
//!
//! A TOML file in the platform config directory lists the devices the
//! operator has paired, plus connection defaults. `HWENERGY_*` environment
//! variables override file values. Entries translate to
//! `hwenergy_core::DeviceConfig`; the core itself never reads files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use hwenergy_core::{CoreError, DeviceConfig, DeviceType, Phases, TlsMode, TransportConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no device named '{name}' in the configuration")]
    UnknownDevice { name: String },

    #[error("no token configured for device '{name}'")]
    NoToken { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// Paired devices, in the order they were saved.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Accept any TLS certificate (devices are self-signed).
    #[serde(default = "default_insecure")]
    pub insecure: bool,

    /// Path to a CA certificate, used when `insecure` is off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// HTTP request and stream handshake timeout, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Freshness window of device telemetry, in seconds.
    #[serde(default = "default_max_age")]
    pub max_age: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            insecure: default_insecure(),
            ca_cert: None,
            timeout: default_timeout(),
            max_age: default_max_age(),
        }
    }
}

fn default_insecure() -> bool {
    true
}
fn default_timeout() -> u64 {
    10
}
fn default_max_age() -> u64 {
    30
}

impl Defaults {
    pub fn transport(&self) -> TransportConfig {
        let tls = if self.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca) = self.ca_cert {
            TlsMode::CustomCa(ca.clone())
        } else {
            TlsMode::System
        };

        TransportConfig {
            tls,
            timeout: Duration::from_secs(self.timeout),
        }
    }
}

/// One paired device.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceEntry {
    /// Operator-facing name (`grid`, `pv`, `battery`...).
    pub name: String,

    pub host: String,

    #[serde(rename = "type")]
    pub device_type: DeviceType,

    /// Token (plaintext, prefer `token_env`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable holding the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Number of measured phases (1 or 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phases: Option<u8>,

    /// HTTP API base when it is not `https://<host>`, e.g. behind a proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<Url>,
}

impl DeviceEntry {
    /// Resolve the token: `token_env` first, then the plaintext value.
    pub fn resolve_token(&self) -> Result<SecretString, ConfigError> {
        if let Some(ref env_name) = self.token_env {
            if let Ok(val) = std::env::var(env_name) {
                return Ok(SecretString::from(val));
            }
        }

        if let Some(ref token) = self.token {
            return Ok(SecretString::from(token.clone()));
        }

        Err(ConfigError::NoToken {
            name: self.name.clone(),
        })
    }

    pub fn phases(&self) -> Result<Phases, ConfigError> {
        let count = self.phases.unwrap_or(1);
        Phases::from_count(count).ok_or_else(|| ConfigError::Validation {
            field: format!("devices.{}.phases", self.name),
            reason: format!("expected 1 or 3, got {count}"),
        })
    }

    /// Build adapter settings from this entry and the global defaults.
    pub fn to_device_config(&self, defaults: &Defaults) -> Result<DeviceConfig, ConfigError> {
        let token = self.resolve_token()?;
        let mut config = DeviceConfig::new(self.host.clone(), token)?
            .with_max_age(Duration::from_secs(defaults.max_age));
        config.transport = defaults.transport();
        if let Some(ref base_url) = self.base_url {
            config.base_url = base_url.clone();
        }
        Ok(config)
    }
}

impl Config {
    pub fn device(&self, name: &str) -> Result<&DeviceEntry, ConfigError> {
        self.devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| ConfigError::UnknownDevice { name: name.into() })
    }

    /// Insert an entry, replacing any existing entry with the same name.
    pub fn upsert_device(&mut self, entry: DeviceEntry) {
        match self.devices.iter_mut().find(|d| d.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.devices.push(entry),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "hwenergy", "hwenergy").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("hwenergy");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from the canonical path plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` plus environment. A missing file yields
/// the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HWENERGY_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
