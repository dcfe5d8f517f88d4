//! Live readings of a configured device.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Local};
use owo_colors::OwoColorize;
use serde::Serialize;

use hwenergy_core::{CoreError, Device, Phases};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

/// One printed reading.
#[derive(Debug, Serialize)]
struct Sample<'a> {
    time: DateTime<Local>,
    device: &'a str,
    power_w: f64,
    energy_import_kwh: f64,
    energy_export_kwh: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    phase_power_w: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_of_charge_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    battery_mode: Option<String>,
}

fn sample<'a>(
    name: &'a str,
    device: &Device,
    phases: Phases,
    invert: bool,
) -> Result<Sample<'a>, CliError> {
    let reading = device.reading()?;

    let phase_power_w = match (device, phases) {
        (Device::Grid(d), Phases::Three) => Some(d.meter().phase_powers(phases, invert)?),
        (Device::Energy(d), Phases::Three) => Some(d.phase_powers(phases, invert)?),
        _ => None,
    };
    // Battery state arrives on its own topic and may lag the measurement.
    let battery_mode = device
        .battery_control()
        .and_then(|control| control.state().ok())
        .map(|state| state.mode.to_string());

    Ok(Sample {
        time: Local::now(),
        device: name,
        power_w: if invert { -reading.power_w } else { reading.power_w },
        energy_import_kwh: reading.energy_import_kwh,
        energy_export_kwh: reading.energy_export_kwh,
        phase_power_w,
        state_of_charge_pct: reading.state_of_charge_pct,
        battery_mode,
    })
}

fn text_line(sample: &Sample<'_>, color: bool) -> String {
    let power = format!("{:>9.1} W", sample.power_w);
    let power = match (color, sample.power_w < 0.0) {
        (false, _) => power,
        (true, true) => power.green().to_string(),
        (true, false) => power.yellow().to_string(),
    };

    let mut line = format!(
        "{}  {power}  import {:>10.3} kWh  export {:>10.3} kWh",
        sample.time.format("%H:%M:%S"),
        sample.energy_import_kwh,
        sample.energy_export_kwh,
    );
    if let Some([l1, l2, l3]) = sample.phase_power_w {
        let _ = write!(line, "  L1 {l1:.0} W  L2 {l2:.0} W  L3 {l3:.0} W");
    }
    if let Some(soc) = sample.state_of_charge_pct {
        let _ = write!(line, "  SoC {soc:.0}%");
    }
    if let Some(ref mode) = sample.battery_mode {
        let _ = write!(line, "  battery {mode}");
    }
    line
}

fn render(sample: &Sample<'_>, format: OutputFormat, color: bool) -> Result<String, CliError> {
    match format {
        OutputFormat::Table | OutputFormat::Plain => Ok(text_line(sample, color)),
        OutputFormat::Json => output::render_json_line(sample),
        OutputFormat::Yaml => Ok(format!("---\n{}", output::render_yaml(sample)?)),
    }
}

/// Wait for the next measurement. A window of `max_age` without one is
/// logged and the wait goes on; link trouble shows up only as staleness.
async fn next_measurement<F, Fut>(
    mut changed: F,
    max_age: Duration,
    device: &str,
) -> Result<(), CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), CoreError>>,
{
    loop {
        match tokio::time::timeout(max_age, changed()).await {
            Ok(result) => return result,
            Err(_) => tracing::warn!(
                device,
                max_age_secs = max_age.as_secs(),
                "no fresh measurement, still watching"
            ),
        }
    }
}

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = util::load_config(global)?;
    let path = util::config_path(global);
    let entry = cfg
        .device(&args.device)
        .map_err(|e| CliError::config(e, &path))?;
    let phases = entry.phases().map_err(|e| CliError::config(e, &path))?;
    let max_age = Duration::from_secs(cfg.defaults.max_age);

    let device = util::connect(global, &cfg, entry).await?;
    let color = output::should_color(global.color, &std::io::stdout());

    if !global.quiet {
        eprintln!(
            "Watching {} ({}) at {}, Ctrl-C to stop",
            entry.name, entry.device_type, entry.host
        );
    }

    let source = &device;
    let mut seen = 0_u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = next_measurement(move || source.measurement_changed(), max_age, &entry.name) => {
                changed?;
                let sample = sample(&entry.name, &device, phases, args.invert)?;
                output::print_output(&render(&sample, global.output, color)?, global.quiet);

                seen += 1;
                if args.count.is_some_and(|n| seen >= n) {
                    break;
                }
            }
        }
    }

    device.stop();
    Ok(())
}
