//! Discovery command handler.

use tabled::Tabled;

use hwenergy_core::pairing::discover_devices;
use hwenergy_core::{DiscoveredDevice, HostProbe};

use crate::cli::{DiscoverArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Type")]
    device_type: String,
    #[tabled(rename = "Product")]
    instance: String,
    #[tabled(rename = "Serial")]
    serial: String,
}

impl From<&DiscoveredDevice> for DeviceRow {
    fn from(d: &DiscoveredDevice) -> Self {
        Self {
            host: d.host.clone(),
            device_type: d.device_type.to_string(),
            instance: d.instance.clone(),
            serial: d.serial.clone(),
        }
    }
}

pub async fn handle(args: DiscoverArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = util::load_config(global)?;
    let transport = util::transport(global, &cfg);
    let probe = HostProbe::new(args.scan.hosts.clone(), &transport)?;
    let scan = util::scan_config(&args.scan);

    let devices = discover_devices(&probe, &scan, |_| {}, |_| async { true }).await?;

    let out = output::render_list(
        global.output,
        &devices,
        |d| DeviceRow::from(d),
        |d| d.host.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
