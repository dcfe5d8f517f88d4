// ── Discovery ──
//
// `Discovery` is the seam to whatever finds devices on the network.
// `collect_devices` turns its asynchronous arrivals into a list, stopping
// after a quiet period without new arrivals or when the scan window ends.

use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hwenergy_api::{DeviceApi, HttpTransport, JsonTransport, TransportConfig, device_base_url};

use crate::device::DeviceType;
use crate::error::CoreError;

/// Default scan window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);
/// Scanning stops after this long without a new device.
pub const QUIET_PERIOD: Duration = Duration::from_secs(3);

/// A device located on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    pub host: String,
    pub device_type: DeviceType,
    /// Instance or product name, for display.
    pub instance: String,
    pub serial: String,
}

/// Source of "device found" records.
pub trait Discovery: Send + Sync {
    /// Send every device found on `found` until `window` elapses or
    /// `cancel` fires.
    fn discover(
        &self,
        window: Duration,
        found: mpsc::UnboundedSender<DiscoveredDevice>,
        cancel: CancellationToken,
    ) -> impl Future<Output = ()> + Send;
}

/// Scan timing.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub window: Duration,
    pub quiet_period: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_SCAN_WINDOW,
            quiet_period: QUIET_PERIOD,
        }
    }
}

// ── HostProbe ────────────────────────────────────────────────────────

/// Discovery over a fixed host list: each host is asked `GET /api` and
/// reported if it answers with a supported product type.
pub struct HostProbe<T = HttpTransport> {
    hosts: Vec<String>,
    api: DeviceApi<T>,
}

impl HostProbe {
    pub fn new(hosts: Vec<String>, transport: &TransportConfig) -> Result<Self, CoreError> {
        Ok(Self::with_transport(hosts, HttpTransport::new(transport)?))
    }
}

impl<T: JsonTransport> HostProbe<T> {
    pub fn with_transport(hosts: Vec<String>, transport: T) -> Self {
        Self {
            hosts,
            api: DeviceApi::new(transport),
        }
    }

    async fn probe(&self, host: &str) -> Result<Option<DiscoveredDevice>, CoreError> {
        let info = self.api.device_info(&device_base_url(host)?).await?;

        let Some(device_type) = DeviceType::from_product_type(&info.product_type) else {
            debug!(host, product_type = %info.product_type, "unsupported product type");
            return Ok(None);
        };

        Ok(Some(DiscoveredDevice {
            host: host.to_owned(),
            device_type,
            instance: info.product_name,
            serial: info.serial,
        }))
    }
}

impl<T: JsonTransport> Discovery for HostProbe<T> {
    async fn discover(
        &self,
        window: Duration,
        found: mpsc::UnboundedSender<DiscoveredDevice>,
        cancel: CancellationToken,
    ) {
        let probes = self.hosts.iter().map(|host| {
            let found = found.clone();
            async move {
                match self.probe(host).await {
                    Ok(Some(device)) => {
                        let _ = found.send(device);
                    }
                    Ok(None) => {}
                    Err(e) => debug!(host = %host, error = %e, "probe failed"),
                }
            }
        });

        tokio::select! {
            () = cancel.cancelled() => debug!("probe cancelled"),
            res = tokio::time::timeout(window, join_all(probes)) => {
                if res.is_err() {
                    debug!("probe window elapsed");
                }
            }
        }
    }
}

// ── Convergence ──────────────────────────────────────────────────────

/// Run `discovery` and collect what it finds.
///
/// The quiet-period timer arms on the first arrival and re-arms on every
/// later one. Collection ends when it expires, when `config.window`
/// elapses, or when the discovery source returns, whichever comes first.
/// Devices reported twice (same host) are kept once. `on_found` sees each
/// new device as it arrives.
pub async fn collect_devices<D, F>(
    discovery: &D,
    config: &ScanConfig,
    mut on_found: F,
) -> Vec<DiscoveredDevice>
where
    D: Discovery,
    F: FnMut(&DiscoveredDevice),
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let scan = discovery.discover(config.window, tx, cancel.clone());
    let deadline = tokio::time::sleep(config.window);
    let quiet = tokio::time::sleep(config.window);
    tokio::pin!(scan, deadline, quiet);

    let mut devices = Vec::new();

    loop {
        tokio::select! {
            Some(device) = rx.recv() => {
                if record(&mut devices, device, &mut on_found) {
                    quiet.as_mut().reset(Instant::now() + config.quiet_period);
                }
            }
            () = &mut quiet, if !devices.is_empty() => {
                debug!(count = devices.len(), "no new devices during quiet period");
                break;
            }
            () = &mut deadline => {
                debug!(count = devices.len(), "scan window elapsed");
                break;
            }
            () = &mut scan => {
                while let Ok(device) = rx.try_recv() {
                    record(&mut devices, device, &mut on_found);
                }
                break;
            }
        }
    }

    cancel.cancel();
    info!(count = devices.len(), "discovery finished");
    devices
}

fn record<F: FnMut(&DiscoveredDevice)>(
    devices: &mut Vec<DiscoveredDevice>,
    device: DiscoveredDevice,
    on_found: &mut F,
) -> bool {
    if devices.iter().any(|d| d.host == device.host) {
        return false;
    }
    on_found(&device);
    devices.push(device);
    true
}

/// Collect devices, then let the operator confirm the list.
///
/// Fails with [`CoreError::NoDevicesFound`] on an empty result and with
/// [`CoreError::DiscoveryAborted`] when `confirm` declines.
pub async fn discover_devices<D, F, C, Fut>(
    discovery: &D,
    config: &ScanConfig,
    on_found: F,
    confirm: C,
) -> Result<Vec<DiscoveredDevice>, CoreError>
where
    D: Discovery,
    F: FnMut(&DiscoveredDevice),
    C: FnOnce(&[DiscoveredDevice]) -> Fut,
    Fut: Future<Output = bool>,
{
    let devices = collect_devices(discovery, config, on_found).await;

    if devices.is_empty() {
        return Err(CoreError::NoDevicesFound);
    }
    if !confirm(&devices).await {
        info!("device list rejected by operator");
        return Err(CoreError::DiscoveryAborted);
    }
    Ok(devices)
}
