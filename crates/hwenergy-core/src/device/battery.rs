use hwenergy_api::models::BatteryMeasurement;

use super::meter::Meter;
use super::{DeviceConfig, EnergyFlow};
use crate::error::CoreError;

/// Default charge limit of a single battery, in W.
pub const DEFAULT_MAX_CHARGE_W: f64 = 800.0;
/// Default discharge limit of a single battery, in W.
pub const DEFAULT_MAX_DISCHARGE_W: f64 = 800.0;
/// Usable capacity of a single battery, in kWh.
pub const DEFAULT_BATTERY_CAPACITY_KWH: f64 = 2.47;

/// Plug-in home battery. Control goes through the grid meter; the
/// battery itself only reports.
pub struct BatteryDevice {
    meter: Meter<BatteryMeasurement>,
}

impl BatteryDevice {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            meter: Meter::new(config),
        }
    }

    pub fn meter(&self) -> &Meter<BatteryMeasurement> {
        &self.meter
    }

    /// Battery power in W; positive while charging.
    pub fn power(&self) -> Result<f64, CoreError> {
        Ok(self.meter.measurement()?.power_w)
    }

    /// State of charge, 0-100 %.
    pub fn state_of_charge(&self) -> Result<f64, CoreError> {
        Ok(self.meter.measurement()?.state_of_charge_pct)
    }

    pub fn cycles(&self) -> Result<u32, CoreError> {
        Ok(self.meter.measurement()?.cycles)
    }

    /// Charged ([`EnergyFlow::Import`]) or discharged
    /// ([`EnergyFlow::Export`]) energy, in kWh.
    pub fn total_energy(&self, flow: EnergyFlow) -> Result<f64, CoreError> {
        let m = self.meter.measurement()?;
        Ok(match flow {
            EnergyFlow::Import => m.energy_import_kwh,
            EnergyFlow::Export => m.energy_export_kwh,
        })
    }

    pub fn capacity_kwh(&self) -> f64 {
        DEFAULT_BATTERY_CAPACITY_KWH
    }

    /// `(max_charge_w, max_discharge_w)`.
    pub fn power_limits(&self) -> (f64, f64) {
        (DEFAULT_MAX_CHARGE_W, DEFAULT_MAX_DISCHARGE_W)
    }
}
