// ── Device adapters ──
//
// One adapter per device type, each owning exactly one stream connection
// and the freshness caches it feeds. `Meter<M>` is the shared engine; the
// grid meter composes it with a battery-control capability.

mod battery;
mod grid;
mod meter;

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tokio::sync::watch;
use url::Url;

use hwenergy_api::{
    LinkState, ReconnectConfig, StreamConnection, TransportConfig, device_base_url,
    device_stream_url,
};

use crate::error::CoreError;

pub use battery::{
    BatteryDevice, DEFAULT_BATTERY_CAPACITY_KWH, DEFAULT_MAX_CHARGE_W, DEFAULT_MAX_DISCHARGE_W,
};
pub use grid::{BatteryControl, ControlPath, GridMeter};
pub use meter::{EnergyMeter, Meter};

/// Default freshness window for device telemetry.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30);

// ── Device type ──────────────────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Grid connection meter with tariff registers (P1 port).
    P1Meter,
    /// Single- or three-phase kWh meter.
    KwhMeter,
    /// Plug-in home battery.
    Battery,
}

impl DeviceType {
    /// Map the `product_type` reported by `GET /api`.
    pub fn from_product_type(product_type: &str) -> Option<Self> {
        match product_type {
            "HWE-P1" => Some(Self::P1Meter),
            "HWE-KWH1" | "HWE-KWH3" | "SDM230-wifi" | "SDM630-wifi" => Some(Self::KwhMeter),
            "HWE-BAT" => Some(Self::Battery),
            _ => None,
        }
    }
}

// ── Phase / energy selectors ─────────────────────────────────────────

/// Wiring of the measured connection.
///
/// Single-phase meters report the aggregate fields only; three-phase
/// meters report authoritative per-line fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phases {
    #[default]
    Single,
    Three,
}

impl Phases {
    pub fn from_count(count: u8) -> Option<Self> {
        match count {
            1 => Some(Self::Single),
            3 => Some(Self::Three),
            _ => None,
        }
    }

    /// Project `(aggregate, [l1, l2, l3])` onto three outputs.
    pub(crate) fn project(self, aggregate: f64, lines: [f64; 3]) -> [f64; 3] {
        match self {
            Self::Single => [aggregate, 0.0, 0.0],
            Self::Three => lines,
        }
    }
}

/// Which energy register to read from a meter that counts both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyFlow {
    /// Energy drawn through the meter (consumption, charging).
    Import,
    /// Energy fed back through the meter (production, discharging).
    Export,
}

// ── Configuration ────────────────────────────────────────────────────

/// Connection settings for one device adapter.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub host: String,
    pub token: SecretString,
    /// Freshness window of every cache the adapter owns.
    pub max_age: Duration,
    /// `https://<host>/`, used for HTTP control calls.
    pub base_url: Url,
    /// `wss://<host>/api/ws`.
    pub stream_url: Url,
    pub transport: TransportConfig,
    pub reconnect: ReconnectConfig,
}

impl DeviceConfig {
    pub fn new(host: impl Into<String>, token: SecretString) -> Result<Self, CoreError> {
        let host = host.into();
        Ok(Self {
            base_url: device_base_url(&host)?,
            stream_url: device_stream_url(&host)?,
            host,
            token,
            max_age: DEFAULT_MAX_AGE,
            transport: TransportConfig::default(),
            reconnect: ReconnectConfig::default(),
        })
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

// ── Device ───────────────────────────────────────────────────────────

/// Latest reading of any device, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub power_w: f64,
    pub energy_import_kwh: f64,
    pub energy_export_kwh: f64,
    pub state_of_charge_pct: Option<f64>,
}

/// An adapter of any supported type.
pub enum Device {
    Grid(GridMeter),
    Energy(EnergyMeter),
    Battery(BatteryDevice),
}

impl Device {
    pub fn new(device_type: DeviceType, config: &DeviceConfig) -> Result<Self, CoreError> {
        Ok(match device_type {
            DeviceType::P1Meter => Self::Grid(GridMeter::new(config)?),
            DeviceType::KwhMeter => Self::Energy(EnergyMeter::new(config)),
            DeviceType::Battery => Self::Battery(BatteryDevice::new(config)),
        })
    }

    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Grid(_) => DeviceType::P1Meter,
            Self::Energy(_) => DeviceType::KwhMeter,
            Self::Battery(_) => DeviceType::Battery,
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Self::Grid(d) => d.meter().host(),
            Self::Energy(d) => d.host(),
            Self::Battery(d) => d.meter().host(),
        }
    }

    fn connection(&self) -> &StreamConnection {
        match self {
            Self::Grid(d) => d.meter().connection(),
            Self::Energy(d) => d.connection(),
            Self::Battery(d) => d.meter().connection(),
        }
    }

    /// Open the stream and wait up to `timeout` for the first handshake.
    pub async fn start(&self, timeout: Duration) -> Result<(), CoreError> {
        self.connection().start_and_wait(timeout).await?;
        Ok(())
    }

    pub fn stop(&self) {
        self.connection().stop();
    }

    pub fn link_state(&self) -> LinkState {
        self.connection().state()
    }

    pub fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.connection().subscribe_state()
    }

    /// Battery control, if this device type offers it.
    pub fn battery_control(&self) -> Option<&BatteryControl> {
        match self {
            Self::Grid(d) => Some(d.battery()),
            Self::Energy(_) | Self::Battery(_) => None,
        }
    }

    /// Resolves on the next measurement written by the stream.
    pub async fn measurement_changed(&self) -> Result<(), CoreError> {
        match self {
            Self::Grid(d) => d.meter().measurement_changed().await,
            Self::Energy(d) => d.measurement_changed().await,
            Self::Battery(d) => d.meter().measurement_changed().await,
        }
    }

    /// Latest fresh reading in device-neutral form.
    pub fn reading(&self) -> Result<Reading, CoreError> {
        match self {
            Self::Grid(d) => {
                let m = d.meter().measurement()?;
                Ok(Reading {
                    power_w: m.common.power_w,
                    energy_import_kwh: m.energy_import_t1_kwh + m.energy_import_t2_kwh,
                    energy_export_kwh: m.energy_export_t1_kwh + m.energy_export_t2_kwh,
                    state_of_charge_pct: None,
                })
            }
            Self::Energy(d) => {
                let m = d.measurement()?;
                Ok(Reading {
                    power_w: m.common.power_w,
                    energy_import_kwh: m.energy_import_kwh,
                    energy_export_kwh: m.energy_export_kwh,
                    state_of_charge_pct: None,
                })
            }
            Self::Battery(d) => {
                let m = d.meter().measurement()?;
                Ok(Reading {
                    power_w: m.power_w,
                    energy_import_kwh: m.energy_import_kwh,
                    energy_export_kwh: m.energy_export_kwh,
                    state_of_charge_pct: Some(m.state_of_charge_pct),
                })
            }
        }
    }
}
