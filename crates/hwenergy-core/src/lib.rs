//! Device adapters and pairing orchestration on top of `hwenergy-api`.
//!
//! - **[`Device`]**: one adapter per device type (P1 grid meter, kWh meter,
//!   plug-in battery), each owning a single stream connection. Every adapter
//!   is built on the generic [`Meter`] engine; the grid meter adds a
//!   [`BatteryControl`] capability by composition.
//!
//! - **[`FreshnessCache`]**: last value plus write time. Reads older than the
//!   configured maximum age fail with [`CoreError::Stale`] rather than
//!   returning old data.
//!
//! - **Pairing** ([`pairing`]): the button-press token handshake for one
//!   device or a discovered batch, with a [`PairingBoard`] that renderers
//!   snapshot or subscribe to.

pub mod device;
pub mod error;
pub mod freshness;
pub mod pairing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use device::{
    BatteryControl, BatteryDevice, ControlPath, DEFAULT_MAX_AGE, Device, DeviceConfig, DeviceType,
    EnergyFlow, EnergyMeter, GridMeter, Meter, Phases, Reading,
};
pub use error::CoreError;
pub use freshness::{FreshnessCache, Stamped};
pub use pairing::{
    BatchOutcome, DeviceStatus, DiscoveredDevice, Discovery, HostProbe, PairedDevice,
    PairingBoard, PairingConfig, PairingPhase, ScanConfig,
};

// Wire types callers need alongside the adapters.
pub use hwenergy_api::models::{BatteriesData, BatteryMode};
pub use hwenergy_api::{LinkState, TlsMode, TransportConfig};
