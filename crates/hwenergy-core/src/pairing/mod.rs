// ── Pairing orchestration ──
//
// Token issuance requires a physical button press on the device. The
// orchestrator polls `POST /api/user` until the press is observed, for
// one device or for a whole batch at once, and keeps a per-device status
// board that renderers can watch.

mod batch;
mod board;
mod discovery;
mod single;

use std::time::Duration;

use secrecy::SecretString;

use crate::device::DeviceType;
use crate::error::CoreError;

pub use batch::{BatchOutcome, discover_and_pair, pair_batch};
pub use board::{DeviceStatus, PairingBoard, PairingPhase};
pub use discovery::{
    DEFAULT_SCAN_WINDOW, DiscoveredDevice, Discovery, HostProbe, QUIET_PERIOD, ScanConfig,
    collect_devices, discover_devices,
};
pub use single::{pair_device, pair_single};

/// Time between token requests.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Token requests per device before giving up.
pub const MAX_ATTEMPTS: u32 = 36;
/// Overall pairing budget, shared by every device of a batch.
pub const PAIRING_DEADLINE: Duration = Duration::from_secs(180);

const MAX_NAME_LEN: usize = 40;

/// Polling policy for the button-press handshake.
#[derive(Debug, Clone)]
pub struct PairingConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub deadline: Duration,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_attempts: MAX_ATTEMPTS,
            deadline: PAIRING_DEADLINE,
        }
    }
}

/// A device that issued a token.
#[derive(Debug, Clone)]
pub struct PairedDevice {
    pub host: String,
    pub device_type: DeviceType,
    pub token: SecretString,
}

/// Check a client name against what devices accept: 1-40 characters of
/// ASCII letters, digits, space and `- _ / \ #`.
pub fn validate_name(name: &str) -> Result<(), CoreError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '\\' | '#' | ' ');

    if !name.is_empty() && name.len() <= MAX_NAME_LEN && name.chars().all(allowed) {
        Ok(())
    } else {
        Err(CoreError::InvalidName {
            name: name.to_owned(),
        })
    }
}
