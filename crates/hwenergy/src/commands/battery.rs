//! Battery mode command handler.

use serde::Serialize;

use hwenergy_core::{BatteryMode, ControlPath, DeviceType};

use crate::cli::{BatteryArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct ModeChange<'a> {
    device: &'a str,
    mode: BatteryMode,
    /// `stream` or `http`.
    via: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    power_w: Option<f64>,
}

fn not_a_grid_meter(name: &str) -> CliError {
    CliError::Unsupported {
        device: name.to_owned(),
        operation: "battery control".into(),
        hint: "Batteries are controlled through the grid meter (type p1meter).".into(),
    }
}

pub async fn handle(args: BatteryArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = util::load_config(global)?;
    let path = util::config_path(global);
    let entry = cfg
        .device(&args.device)
        .map_err(|e| CliError::config(e, &path))?;

    if entry.device_type != DeviceType::P1Meter {
        return Err(not_a_grid_meter(&entry.name));
    }

    let mode = BatteryMode::from(args.mode);
    let (device, timeout) = util::device(global, &cfg, entry)?;
    // Without a stream the mode change goes out over HTTP instead.
    if let Err(e) = device.start(timeout).await {
        tracing::warn!(device = %entry.name, error = %e, "device stream unavailable");
    }
    let control = device
        .battery_control()
        .ok_or_else(|| not_a_grid_meter(&entry.name))?;

    let path_taken = control.set_mode(mode).await;
    let change = match path_taken? {
        ControlPath::Stream => {
            // Confirmation arrives with the next `batteries` report.
            let confirmed = match control.wait_for_mode(mode, timeout).await {
                Ok(state) => Some(state.power_w),
                Err(e) => {
                    tracing::warn!(error = %e, "battery mode change not confirmed");
                    None
                }
            };
            ModeChange {
                device: &entry.name,
                mode,
                via: "stream",
                power_w: confirmed,
            }
        }
        ControlPath::Http(state) => ModeChange {
            device: &entry.name,
            mode: state.mode,
            via: "http",
            power_w: Some(state.power_w),
        },
    };

    device.stop();

    let rendered = match global.output {
        OutputFormat::Table | OutputFormat::Plain => match change.power_w {
            Some(power) => format!(
                "Battery mode set to {} via {} (power {power:.0} W)",
                change.mode, change.via
            ),
            None => format!("Battery mode set to {} via {}", change.mode, change.via),
        },
        OutputFormat::Json => output::render_json(&change)?,
        OutputFormat::Yaml => output::render_yaml(&change)?,
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}
