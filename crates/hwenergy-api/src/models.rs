// Wire types for the device v2 API.
//
// Measurement payloads arrive over the WebSocket stream; token, battery
// and device-info payloads come from the HTTP API. Every numeric field
// defaults to zero because devices omit fields they do not measure
// (a 1-phase meter never sends `power_l2_w`).

use serde::{Deserialize, Serialize};

/// Power, voltage and current fields shared by every meter type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonMeasurement {
    pub power_w: f64,
    /// 3-phase only.
    pub power_l1_w: f64,
    pub power_l2_w: f64,
    pub power_l3_w: f64,

    /// 1-phase or aggregate.
    pub voltage_v: f64,
    pub voltage_l1_v: f64,
    pub voltage_l2_v: f64,
    pub voltage_l3_v: f64,

    pub current_a: f64,
    pub current_l1_a: f64,
    pub current_l2_a: f64,
    pub current_l3_a: f64,
}

/// A measurement record that carries the common power/voltage/current set.
pub trait MeterMeasurement {
    fn common(&self) -> &CommonMeasurement;
}

/// Grid (P1) meter measurement with tariff-split energy totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct P1Measurement {
    #[serde(flatten)]
    pub common: CommonMeasurement,

    pub energy_import_t1_kwh: f64,
    pub energy_import_t2_kwh: f64,
    pub energy_export_t1_kwh: f64,
    pub energy_export_t2_kwh: f64,
}

impl MeterMeasurement for P1Measurement {
    fn common(&self) -> &CommonMeasurement {
        &self.common
    }
}

/// kWh meter measurement with simple import/export totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KwhMeasurement {
    #[serde(flatten)]
    pub common: CommonMeasurement,

    pub energy_import_kwh: f64,
    pub energy_export_kwh: f64,
}

impl MeterMeasurement for KwhMeasurement {
    fn common(&self) -> &CommonMeasurement {
        &self.common
    }
}

/// Battery measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryMeasurement {
    pub power_w: f64,
    pub energy_import_kwh: f64,
    pub energy_export_kwh: f64,
    pub state_of_charge_pct: f64,
    pub cycles: u32,
}

// ── Battery control ──────────────────────────────────────────────────

/// Battery control mode, as understood by the grid meter.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatteryMode {
    /// Charge or discharge to keep the grid exchange at zero.
    Zero,
    /// Charge to full regardless of grid exchange.
    ToFull,
    /// Neither charge nor discharge.
    Standby,
    /// Reported by firmware but not known to this client. Never sent.
    #[serde(other)]
    Unknown,
}

impl BatteryMode {
    /// Whether this mode can be requested from the device.
    pub fn is_settable(self) -> bool {
        self != Self::Unknown
    }
}

/// Decode a reported mode, mapping names this client does not know to
/// [`BatteryMode::Unknown`] so the rest of the report still lands.
fn lenient_mode<'de, D>(deserializer: D) -> Result<BatteryMode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.parse().unwrap_or_else(|_| {
        tracing::warn!(mode = %raw, "unknown battery mode reported");
        BatteryMode::Unknown
    }))
}

/// Battery group state reported by the grid meter, both on the
/// `batteries` topic and as the response to a mode change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteriesData {
    #[serde(deserialize_with = "lenient_mode")]
    pub mode: BatteryMode,
    #[serde(default)]
    pub power_w: f64,
    #[serde(default)]
    pub target_power_w: f64,
    #[serde(default)]
    pub max_consumption_w: f64,
    #[serde(default)]
    pub max_production_w: f64,
}

/// Request body for a battery mode change.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BatteryModeRequest {
    pub mode: BatteryMode,
}

// ── Pairing ──────────────────────────────────────────────────────────

/// Request body for token issuance.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest {
    pub name: String,
}

/// Successful token issuance response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Unauthenticated device identification from `GET /api`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub product_name: String,
    pub product_type: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub firmware_version: String,
    #[serde(default)]
    pub api_version: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn three_phase_p1_measurement() {
        let json = serde_json::json!({
            "power_w": 1200.5,
            "power_l1_w": 400.0,
            "power_l2_w": 500.0,
            "power_l3_w": 300.5,
            "voltage_l1_v": 230.1,
            "current_l1_a": 1.8,
            "energy_import_t1_kwh": 1000.25,
            "energy_import_t2_kwh": 2000.5,
            "energy_export_t1_kwh": 10.0,
            "any_power_fail_count": 3
        });

        let m: P1Measurement = serde_json::from_value(json).unwrap();
        assert!((m.common.power_w - 1200.5).abs() < f64::EPSILON);
        assert!((m.common.power_l2_w - 500.0).abs() < f64::EPSILON);
        assert!((m.common.voltage_l1_v - 230.1).abs() < f64::EPSILON);
        assert!((m.energy_import_t2_kwh - 2000.5).abs() < f64::EPSILON);
        assert!(m.energy_export_t2_kwh.abs() < f64::EPSILON);
    }

    #[test]
    fn one_phase_kwh_measurement_leaves_phase_fields_zero() {
        let json = r#"{"power_w":-850.0,"voltage_v":231.0,"current_a":3.7,"energy_export_kwh":4321.0}"#;
        let m: KwhMeasurement = serde_json::from_str(json).unwrap();
        assert!((m.common().power_w + 850.0).abs() < f64::EPSILON);
        assert!(m.common().power_l1_w.abs() < f64::EPSILON);
        assert!((m.energy_export_kwh - 4321.0).abs() < f64::EPSILON);
    }

    #[test]
    fn battery_mode_wire_names() {
        assert_eq!(
            serde_json::to_string(&BatteryModeRequest {
                mode: BatteryMode::ToFull
            })
            .unwrap(),
            r#"{"mode":"to_full"}"#
        );
        assert_eq!("standby".parse::<BatteryMode>(), Ok(BatteryMode::Standby));
        assert!("off".parse::<BatteryMode>().is_err());
        assert_eq!(BatteryMode::ToFull.to_string(), "to_full");
        assert_eq!(BatteryMode::Zero.as_ref(), "zero");
        assert!(!BatteryMode::Unknown.is_settable());
    }

    #[test]
    fn unknown_reported_mode_keeps_the_report() {
        let json = r#"{"mode":"predictive","power_w":120,"max_consumption_w":1600,"max_production_w":800}"#;
        let b: BatteriesData = serde_json::from_str(json).unwrap();
        assert_eq!(b.mode, BatteryMode::Unknown);
        assert!((b.power_w - 120.0).abs() < f64::EPSILON);
        assert!((b.max_consumption_w - 1600.0).abs() < f64::EPSILON);
    }

    #[test]
    fn batteries_data_from_meter() {
        let json = r#"{"mode":"zero","power_w":-404,"target_power_w":-400,"max_consumption_w":1600,"max_production_w":800}"#;
        let b: BatteriesData = serde_json::from_str(json).unwrap();
        assert_eq!(b.mode, BatteryMode::Zero);
        assert!((b.max_consumption_w - 1600.0).abs() < f64::EPSILON);
        assert!((b.max_production_w - 800.0).abs() < f64::EPSILON);
    }
}
