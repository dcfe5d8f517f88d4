//! Meter configuration generated from a pairing run.
//!
//! Grid meters become `grid`, `grid2`..., kWh meters `pv`, `pv2`...,
//! batteries `battery`, `battery2`.... Batteries reference the first grid
//! meter as their controller when one was paired.

use secrecy::ExposeSecret;
use serde::Serialize;

use hwenergy_config::DeviceEntry;
use hwenergy_core::{DeviceType, PairedDevice};

use crate::error::CliError;
use crate::output;

const GRID: &str = "grid";

const NOTES: &str = "\
# Notes:
# - Each meter entry configures ONE device
# - homewizard-p1: P1 meter for grid monitoring
# - homewizard-kwh: kWh meter for PV monitoring
# - homewizard-battery: Battery device for SoC and power
# - Battery requires 'controller' parameter (name of the P1 meter)
";

/// A paired device with its assigned meter name.
#[derive(Debug)]
pub struct NamedMeter<'a> {
    pub name: String,
    pub device: &'a PairedDevice,
}

#[derive(Serialize)]
struct MetersBlock<'a> {
    meters: Vec<MeterEntry<'a>>,
}

#[derive(Serialize)]
struct MeterEntry<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    host: &'a str,
    token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    controller: Option<&'static str>,
}

fn meter_type(device_type: DeviceType) -> &'static str {
    match device_type {
        DeviceType::P1Meter => "homewizard-p1",
        DeviceType::KwhMeter => "homewizard-kwh",
        DeviceType::Battery => "homewizard-battery",
    }
}

fn numbered(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_owned()
    } else {
        format!("{base}{}", index + 1)
    }
}

/// Assign meter names: grid meters first, then kWh meters, then batteries,
/// each group in pairing order.
pub fn assign_names(devices: &[PairedDevice]) -> Vec<NamedMeter<'_>> {
    let groups = [
        (DeviceType::P1Meter, GRID),
        (DeviceType::KwhMeter, "pv"),
        (DeviceType::Battery, "battery"),
    ];

    groups
        .iter()
        .flat_map(|(device_type, base)| {
            devices
                .iter()
                .filter(move |d| d.device_type == *device_type)
                .enumerate()
                .map(move |(i, device)| NamedMeter {
                    name: numbered(base, i),
                    device,
                })
        })
        .collect()
}

/// YAML `meters:` block followed by explanatory comments.
pub fn render(devices: &[PairedDevice]) -> Result<String, CliError> {
    let named = assign_names(devices);
    let has_grid = named.iter().any(|m| m.device.device_type == DeviceType::P1Meter);

    let meters = named
        .iter()
        .map(|m| MeterEntry {
            name: &m.name,
            kind: meter_type(m.device.device_type),
            host: &m.device.host,
            token: m.device.token.expose_secret(),
            controller: (m.device.device_type == DeviceType::Battery && has_grid).then_some(GRID),
        })
        .collect();

    let mut yaml = output::render_yaml(&MetersBlock { meters })?;
    if !named.is_empty() {
        yaml.push('\n');
        yaml.push_str(NOTES);
    }
    Ok(yaml)
}

/// Config file entries for the paired devices, under their meter names.
pub fn config_entries(devices: &[PairedDevice]) -> Vec<DeviceEntry> {
    assign_names(devices)
        .into_iter()
        .map(|m| DeviceEntry {
            name: m.name,
            host: m.device.host.clone(),
            device_type: m.device.device_type,
            token: Some(m.device.token.expose_secret().to_owned()),
            token_env: None,
            phases: None,
            base_url: None,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;

    use super::*;

    fn paired(host: &str, device_type: DeviceType) -> PairedDevice {
        PairedDevice {
            host: host.into(),
            device_type,
            token: SecretString::from(format!("TOKEN{}", host.replace('.', ""))),
        }
    }

    #[test]
    fn names_follow_type_order() {
        let devices = [
            paired("10.0.0.4", DeviceType::Battery),
            paired("10.0.0.2", DeviceType::KwhMeter),
            paired("10.0.0.1", DeviceType::P1Meter),
            paired("10.0.0.3", DeviceType::KwhMeter),
        ];

        let names: Vec<_> = assign_names(&devices)
            .into_iter()
            .map(|m| (m.name, m.device.host.as_str()))
            .collect();

        assert_eq!(
            names,
            [
                ("grid".to_owned(), "10.0.0.1"),
                ("pv".to_owned(), "10.0.0.2"),
                ("pv2".to_owned(), "10.0.0.3"),
                ("battery".to_owned(), "10.0.0.4"),
            ]
        );
    }

    #[test]
    fn battery_references_grid() {
        let devices = [
            paired("10.0.0.1", DeviceType::P1Meter),
            paired("10.0.0.4", DeviceType::Battery),
        ];
        let yaml = render(&devices).unwrap();

        assert!(yaml.starts_with("meters:\n"));
        assert!(yaml.contains("name: grid\n  type: homewizard-p1\n  host: 10.0.0.1"));
        assert!(yaml.contains("type: homewizard-battery"));
        assert!(yaml.contains("controller: grid"));
        assert!(yaml.contains("# Notes:"));
    }

    #[test]
    fn battery_without_grid_has_no_controller() {
        let yaml = render(&[paired("10.0.0.4", DeviceType::Battery)]).unwrap();
        assert!(!yaml.contains("controller:"));
    }

    #[test]
    fn config_entries_carry_tokens() {
        let entries = config_entries(&[paired("10.0.0.2", DeviceType::KwhMeter)]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "pv");
        assert_eq!(entries[0].token.as_deref(), Some("TOKEN10002"));
    }
}
