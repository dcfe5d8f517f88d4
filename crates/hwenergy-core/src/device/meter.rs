// ── Generic meter engine ──
//
// `Meter<M>` owns one stream connection and one measurement cache of
// record type `M`. Extra topics (the grid meter's `batteries`) are wired
// in as additional routes that feed their own caches.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use tracing::trace;

use hwenergy_api::models::{KwhMeasurement, MeterMeasurement, P1Measurement};
use hwenergy_api::{MessageHandler, StreamConfig, StreamConnection};

use super::{DeviceConfig, EnergyFlow, Phases};
use crate::error::CoreError;
use crate::freshness::FreshnessCache;

/// Decoder for one message type.
pub(crate) type Route = Box<dyn Fn(&RawValue) -> Result<(), hwenergy_api::Error> + Send + Sync>;

/// Route that decodes the payload as `T` and stores it in `cache`.
pub(crate) fn cache_route<T>(cache: Arc<FreshnessCache<T>>) -> Route
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    Box::new(move |raw: &RawValue| {
        let value = serde_json::from_str::<T>(raw.get())
            .map_err(|e| hwenergy_api::Error::deserialization(&e, raw.get()))?;
        cache.set(value);
        Ok(())
    })
}

/// Dispatch by message type; unrouted types are ignored.
fn router(routes: Vec<(&'static str, Route)>) -> MessageHandler {
    Arc::new(move |kind: &str, data: &RawValue| {
        match routes.iter().find(|(topic, _)| *topic == kind) {
            Some((_, route)) => route(data),
            None => {
                trace!(msg_type = kind, "ignoring message type");
                Ok(())
            }
        }
    })
}

/// kWh meter: the plain engine over [`KwhMeasurement`].
pub type EnergyMeter = Meter<KwhMeasurement>;

/// Stream-fed meter over measurement record type `M`.
pub struct Meter<M> {
    host: String,
    measurement: Arc<FreshnessCache<M>>,
    connection: Arc<StreamConnection>,
}

impl<M> Meter<M>
where
    M: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Meter subscribed to `measurement` only.
    pub fn new(config: &DeviceConfig) -> Self {
        Self::with_routes(config, Vec::new())
    }

    pub(crate) fn with_routes(config: &DeviceConfig, extra: Vec<(&'static str, Route)>) -> Self {
        let measurement = Arc::new(FreshnessCache::new(config.max_age));

        let mut routes = vec![("measurement", cache_route(Arc::clone(&measurement)))];
        routes.extend(extra);
        let topics: Vec<&str> = routes.iter().map(|(topic, _)| *topic).collect();

        let mut stream = StreamConfig::new(config.stream_url.clone(), config.token.clone(), topics);
        stream.transport = config.transport.clone();
        stream.reconnect = config.reconnect.clone();

        Self {
            host: config.host.clone(),
            measurement,
            connection: Arc::new(StreamConnection::new(stream, router(routes))),
        }
    }
}

impl<M: Clone> Meter<M> {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn connection(&self) -> &StreamConnection {
        &self.connection
    }

    pub(crate) fn connection_handle(&self) -> Arc<StreamConnection> {
        Arc::clone(&self.connection)
    }

    /// Latest fresh measurement record.
    pub fn measurement(&self) -> Result<M, CoreError> {
        self.measurement.get()
    }

    /// Resolves on the next measurement written by the stream.
    pub async fn measurement_changed(&self) -> Result<(), CoreError> {
        let mut rx = self.measurement.subscribe();
        rx.changed().await.map_err(|_| CoreError::NotConnected)
    }

    #[cfg(test)]
    pub(crate) fn measurement_cache(&self) -> &FreshnessCache<M> {
        &self.measurement
    }
}

// ── Common accessors ─────────────────────────────────────────────────

impl<M: MeterMeasurement + Clone> Meter<M> {
    /// Total power in W. `invert` flips the sign for meters where
    /// production is reported as negative.
    pub fn power(&self, invert: bool) -> Result<f64, CoreError> {
        let power = self.measurement()?.common().power_w;
        Ok(if invert { -power } else { power })
    }

    pub fn phase_powers(&self, phases: Phases, invert: bool) -> Result<[f64; 3], CoreError> {
        let m = self.measurement()?;
        let c = m.common();
        let powers = phases.project(c.power_w, [c.power_l1_w, c.power_l2_w, c.power_l3_w]);
        Ok(if invert { powers.map(|p| -p) } else { powers })
    }

    pub fn phase_voltages(&self, phases: Phases) -> Result<[f64; 3], CoreError> {
        let m = self.measurement()?;
        let c = m.common();
        Ok(phases.project(c.voltage_v, [c.voltage_l1_v, c.voltage_l2_v, c.voltage_l3_v]))
    }

    pub fn phase_currents(&self, phases: Phases) -> Result<[f64; 3], CoreError> {
        let m = self.measurement()?;
        let c = m.common();
        Ok(phases.project(c.current_a, [c.current_l1_a, c.current_l2_a, c.current_l3_a]))
    }
}

// ── Record-specific energy ───────────────────────────────────────────

impl Meter<P1Measurement> {
    /// Imported energy over both tariffs, in kWh.
    pub fn total_energy(&self) -> Result<f64, CoreError> {
        let m = self.measurement()?;
        Ok(m.energy_import_t1_kwh + m.energy_import_t2_kwh)
    }
}

impl Meter<KwhMeasurement> {
    /// Import or export register, in kWh. PV meters read
    /// [`EnergyFlow::Export`], consumers [`EnergyFlow::Import`].
    pub fn total_energy(&self, flow: EnergyFlow) -> Result<f64, CoreError> {
        let m = self.measurement()?;
        Ok(match flow {
            EnergyFlow::Import => m.energy_import_kwh,
            EnergyFlow::Export => m.energy_export_kwh,
        })
    }
}
