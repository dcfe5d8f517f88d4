// ── Grid meter ──
//
// A P1 meter is a `Meter<P1Measurement>` plus a battery-control
// capability: the meter also reports the state of the battery group
// behind it and accepts mode changes for that group.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, error, info};
use url::Url;

use hwenergy_api::models::{BatteriesData, BatteryMode, BatteryModeRequest, P1Measurement};
use hwenergy_api::{DeviceApi, HttpTransport, JsonTransport, StreamConnection};

use super::DeviceConfig;
use super::meter::{Meter, cache_route};
use crate::error::CoreError;
use crate::freshness::FreshnessCache;

/// Which path carried a battery mode change.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlPath {
    /// Queued on the live device stream. The device does not echo.
    Stream,
    /// Applied through `PUT /api/batteries`; carries the echoed state.
    Http(BatteriesData),
}

/// In-band control message: `{"type":"batteries","data":{"mode":…}}`.
#[derive(Serialize)]
struct BatteriesCommand {
    #[serde(rename = "type")]
    kind: &'static str,
    data: BatteryModeRequest,
}

/// Battery-group control exposed by a grid meter.
pub struct BatteryControl<T = HttpTransport> {
    host: String,
    base_url: Url,
    token: SecretString,
    api: DeviceApi<T>,
    connection: Arc<StreamConnection>,
    state: Arc<FreshnessCache<BatteriesData>>,
}

impl<T: JsonTransport> BatteryControl<T> {
    /// `(max_consumption_w, max_production_w)` of the battery group.
    pub fn power_limits(&self) -> Result<(f64, f64), CoreError> {
        let state = self.state.get()?;
        Ok((state.max_consumption_w, state.max_production_w))
    }

    /// Latest `batteries` report: mode, power, target power and limits.
    pub fn state(&self) -> Result<BatteriesData, CoreError> {
        self.state.get()
    }

    /// Wait until a `batteries` report carries `mode`.
    ///
    /// In-band changes are not answered directly; the device confirms them
    /// by reporting the new mode on its next `batteries` message.
    pub async fn wait_for_mode(
        &self,
        mode: BatteryMode,
        timeout: Duration,
    ) -> Result<BatteriesData, CoreError> {
        let mut rx = self.state.subscribe();
        let confirmed = async {
            let slot = rx
                .wait_for(|slot| slot.as_ref().is_some_and(|s| s.value.mode == mode))
                .await
                .map_err(|_| CoreError::NotConnected)?;
            slot.as_ref()
                .map(|s| s.value.clone())
                .ok_or(CoreError::NotConnected)
        };

        tokio::time::timeout(timeout, confirmed)
            .await
            .map_err(|_| CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
            })?
    }

    /// Change the battery mode.
    ///
    /// Tries the device stream first. If the stream refuses the message
    /// (not connected) the same mode goes out over HTTP. The HTTP call does
    /// not wait for or cancel an in-band attempt, so a change may reach the
    /// device twice; mode changes are idempotent on the device.
    pub async fn set_mode(&self, mode: BatteryMode) -> Result<ControlPath, CoreError> {
        if !mode.is_settable() {
            return Err(CoreError::InvalidMode {
                mode: mode.to_string(),
            });
        }
        info!(host = %self.host, %mode, "setting battery mode");

        let command = BatteriesCommand {
            kind: "batteries",
            data: BatteryModeRequest { mode },
        };

        match self.connection.send(&command) {
            Ok(()) => {
                debug!(host = %self.host, "battery mode sent over device stream");
                Ok(ControlPath::Stream)
            }
            Err(e) => {
                debug!(host = %self.host, error = %e, "device stream unavailable, falling back to HTTP");
                let echoed = self
                    .api
                    .set_battery_mode(&self.base_url, &self.token, mode)
                    .await
                    .map_err(|e| {
                        error!(host = %self.host, error = %e, "HTTP battery control failed");
                        CoreError::from(e)
                    })?;
                info!(
                    host = %self.host,
                    mode = %echoed.mode,
                    power_w = echoed.power_w,
                    "battery mode set via HTTP"
                );
                Ok(ControlPath::Http(echoed))
            }
        }
    }
}

/// P1 grid meter with battery-group control.
pub struct GridMeter<T = HttpTransport> {
    meter: Meter<P1Measurement>,
    battery: BatteryControl<T>,
}

impl GridMeter {
    pub fn new(config: &DeviceConfig) -> Result<Self, CoreError> {
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: JsonTransport> GridMeter<T> {
    /// Grid meter whose HTTP fallback runs over `transport`.
    pub fn with_transport(config: &DeviceConfig, transport: T) -> Self {
        let state = Arc::new(FreshnessCache::<BatteriesData>::new(config.max_age));
        let meter = Meter::<P1Measurement>::with_routes(
            config,
            vec![("batteries", cache_route(Arc::clone(&state)))],
        );

        let battery = BatteryControl {
            host: config.host.clone(),
            base_url: config.base_url.clone(),
            token: config.token.clone(),
            api: DeviceApi::new(transport),
            connection: meter.connection_handle(),
            state,
        };

        Self { meter, battery }
    }

    pub fn meter(&self) -> &Meter<P1Measurement> {
        &self.meter
    }

    pub fn battery(&self) -> &BatteryControl<T> {
        &self.battery
    }

    /// Imported energy over both tariffs, in kWh.
    pub fn total_energy(&self) -> Result<f64, CoreError> {
        self.meter.total_energy()
    }

    pub fn battery_power_limits(&self) -> Result<(f64, f64), CoreError> {
        self.battery.power_limits()
    }

    pub fn battery_state(&self) -> Result<BatteriesData, CoreError> {
        self.battery.state()
    }

    pub async fn set_battery_mode(&self, mode: BatteryMode) -> Result<ControlPath, CoreError> {
        self.battery.set_mode(mode).await
    }
}
