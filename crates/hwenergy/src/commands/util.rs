//! Shared helpers for command handlers.

use std::path::PathBuf;
use std::time::Duration;

use hwenergy_config::{Config, DeviceEntry};
use hwenergy_core::{Device, ScanConfig, TransportConfig};

use crate::cli::{GlobalOpts, ScanArgs};
use crate::error::CliError;

/// Config file in effect: `--config` or the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(hwenergy_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = config_path(global);
    hwenergy_config::load_config_from(&path).map_err(|e| CliError::config(e, &path))
}

/// Transport settings from the config defaults, with `--timeout` applied.
pub fn transport(global: &GlobalOpts, cfg: &Config) -> TransportConfig {
    let mut transport = cfg.defaults.transport();
    if let Some(secs) = global.timeout {
        transport.timeout = Duration::from_secs(secs);
    }
    transport
}

pub fn scan_config(args: &ScanArgs) -> ScanConfig {
    ScanConfig {
        window: Duration::from_secs(args.scan_secs),
        ..ScanConfig::default()
    }
}

/// Build the adapter for a configured device without opening its stream.
///
/// Returns the device together with the handshake timeout in effect.
pub fn device(
    global: &GlobalOpts,
    cfg: &Config,
    entry: &DeviceEntry,
) -> Result<(Device, Duration), CliError> {
    let path = config_path(global);
    let mut device_config = entry
        .to_device_config(&cfg.defaults)
        .map_err(|e| CliError::config(e, &path))?;
    device_config.transport = transport(global, cfg);

    let timeout = device_config.transport.timeout;
    Ok((Device::new(entry.device_type, &device_config)?, timeout))
}

/// Build the adapter for a configured device and open its stream.
pub async fn connect(
    global: &GlobalOpts,
    cfg: &Config,
    entry: &DeviceEntry,
) -> Result<Device, CliError> {
    let (device, timeout) = device(global, cfg, entry)?;
    tracing::debug!(device = %entry.name, host = %entry.host, "connecting");
    device.start(timeout).await?;
    Ok(device)
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
///
/// The prompt blocks on the terminal, so it runs on the blocking pool.
pub async fn confirm(message: &str, default: bool, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    let prompt = message.to_owned();
    tokio::task::spawn_blocking(move || {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()
    })
    .await
    .map_err(|e| CliError::Io(std::io::Error::other(e)))?
    .map_err(|e| CliError::Io(std::io::Error::other(e)))
}
