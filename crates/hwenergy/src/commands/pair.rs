//! Pairing command handlers.

use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;
use secrecy::ExposeSecret;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use hwenergy_api::{DeviceApi, HttpTransport};
use hwenergy_core::pairing::{discover_and_pair, pair_single, validate_name};
use hwenergy_core::{DeviceStatus, HostProbe, PairingConfig, PairingPhase};

use crate::cli::{GlobalOpts, OutputFormat, PairArgs, PairOneArgs};
use crate::error::CliError;
use crate::{meter_config, output};

use super::util;

// ── pair ────────────────────────────────────────────────────────────

pub async fn handle(args: PairArgs, global: &GlobalOpts) -> Result<(), CliError> {
    validate_name(&args.name)?;

    let cfg = util::load_config(global)?;
    let transport = util::transport(global, &cfg);
    let probe = HostProbe::new(args.scan.hosts.clone(), &transport)?;
    let api = DeviceApi::new(HttpTransport::new(&transport)?);
    let scan = util::scan_config(&args.scan);
    let color = output::should_color(global.color, &std::io::stderr());

    if !global.quiet {
        eprintln!("Scanning for devices (max {}s)...\n", args.scan.scan_secs);
    }

    let mut found = 0_usize;
    let mut prompt_error = None;
    let prompt_slot = &mut prompt_error;
    let mut renderer = None;

    let result = discover_and_pair(
        &probe,
        &api,
        &args.name,
        &scan,
        &PairingConfig::default(),
        |device| {
            found += 1;
            if !global.quiet {
                eprintln!(
                    "  {found}. {} ({}) at {}",
                    device.instance, device.device_type, device.host
                );
            }
        },
        |_| {
            eprintln!();
            async move {
                util::confirm("Is this everything?", true, global.yes)
                    .await
                    .unwrap_or_else(|e| {
                        *prompt_slot = Some(e);
                        false
                    })
            }
        },
        |board| {
            if !global.quiet {
                eprintln!("\nPress the button on ALL devices NOW!\n");
                renderer = Some(spawn_board_renderer(board.subscribe(), color));
            }
        },
    )
    .await;

    if let Some(handle) = renderer {
        let _ = handle.await;
    }
    if let Some(err) = prompt_error {
        return Err(err);
    }
    let outcome = result?;

    if outcome.failed > 0 {
        eprintln!("\nWarning: {} device(s) failed to pair", outcome.failed);
    }
    if outcome.paired.is_empty() {
        return Err(CliError::NothingPaired {
            failed: outcome.failed,
        });
    }

    if args.save {
        let path = util::config_path(global);
        let mut cfg = cfg;
        let entries = meter_config::config_entries(&outcome.paired);
        let count = entries.len();
        for entry in entries {
            cfg.upsert_device(entry);
        }
        hwenergy_config::save_config_to(&cfg, &path).map_err(|e| CliError::config(e, &path))?;
        eprintln!("\nSaved {count} device(s) to {}", path.display());
    }

    if !global.quiet {
        eprintln!("\nConfiguration complete! Add this to your meter configuration:\n");
    }
    output::print_output(&meter_config::render(&outcome.paired)?, global.quiet);
    Ok(())
}

/// Draw one status line per device until every device is finished or
/// the board goes away.
fn spawn_board_renderer(mut rx: watch::Receiver<Vec<DeviceStatus>>, color: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template("[{prefix}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let bars: Vec<ProgressBar> = rx
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(style.clone());
                bar.set_prefix((i + 1).to_string());
                bar.set_message(status_message(status, color));
                bar
            })
            .collect();

        loop {
            let done = {
                let snapshot = rx.borrow_and_update();
                for (bar, status) in bars.iter().zip(snapshot.iter()) {
                    bar.set_message(status_message(status, color));
                }
                snapshot.iter().all(DeviceStatus::is_finished)
            };
            if done || rx.changed().await.is_err() {
                break;
            }
        }

        for bar in &bars {
            bar.finish();
        }
    })
}

fn status_message(status: &DeviceStatus, color: bool) -> String {
    let line = status.status_line();
    let line = match (&status.phase, color) {
        (PairingPhase::Paired, true) => line.green().to_string(),
        (PairingPhase::Failed { .. }, true) => line.red().to_string(),
        _ => line,
    };
    format!("{}: {line}", status.host)
}

// ── pair-one ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct TokenOutput<'a> {
    host: &'a str,
    token: &'a str,
}

pub async fn handle_one(args: PairOneArgs, global: &GlobalOpts) -> Result<(), CliError> {
    validate_name(&args.name)?;

    let cfg = util::load_config(global)?;
    let transport = util::transport(global, &cfg);
    let config = PairingConfig::default();
    let max_attempts = config.max_attempts;

    let bar = if global.quiet {
        ProgressBar::hidden()
    } else {
        eprintln!("Device: {}\n\nPress the button on your device NOW!\n", args.host);
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    };
    bar.set_message("initializing...");

    let result = pair_single(&args.host, &args.name, &config, &transport, |attempt| {
        bar.set_message(format!(
            "waiting for button press (attempt {attempt}/{max_attempts})..."
        ));
    })
    .await;

    match &result {
        Ok(_) => bar.finish_with_message("paired"),
        Err(e) => bar.abandon_with_message(format!("failed: {e}")),
    }
    let token = result?;

    let out = TokenOutput {
        host: &args.host,
        token: token.expose_secret(),
    };
    let rendered = match global.output {
        OutputFormat::Table => format!("Token: {}", out.token),
        OutputFormat::Plain => out.token.to_owned(),
        OutputFormat::Json => output::render_json(&out)?,
        OutputFormat::Yaml => output::render_yaml(&out)?,
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}
