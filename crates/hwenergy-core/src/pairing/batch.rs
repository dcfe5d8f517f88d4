use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{info, warn};

use hwenergy_api::{DeviceApi, JsonTransport};

use super::board::PairingBoard;
use super::discovery::{DiscoveredDevice, Discovery, ScanConfig, discover_devices};
use super::single::pair_device;
use super::{PairedDevice, PairingConfig, validate_name};
use crate::error::CoreError;

/// Final report of a batch: the devices that issued a token, and how
/// many did not.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub paired: Vec<PairedDevice>,
    pub failed: usize,
}

/// Pair every device concurrently under one shared deadline.
///
/// Each device runs [`pair_device`] independently; a failure is recorded
/// on `board` and counted, never propagated to siblings. The board must
/// have been built from the same `devices` slice.
pub async fn pair_batch<T: JsonTransport>(
    api: &DeviceApi<T>,
    devices: &[DiscoveredDevice],
    name: &str,
    config: &PairingConfig,
    board: &PairingBoard,
) -> Result<BatchOutcome, CoreError> {
    validate_name(name)?;

    let deadline = Instant::now() + config.deadline;
    info!(count = devices.len(), "pairing devices");

    let attempts = devices.iter().enumerate().map(|(index, device)| async move {
        let attempt = pair_device(api, &device.host, name, config, |n| {
            board.record_attempt(index, n);
        });

        let result = tokio::time::timeout_at(deadline, attempt)
            .await
            .unwrap_or_else(|_| {
                Err(CoreError::PairingTimeout {
                    host: device.host.clone(),
                    timeout_secs: config.deadline.as_secs(),
                })
            });

        match result {
            Ok(token) => {
                board.record_paired(index, token.clone());
                Some(PairedDevice {
                    host: device.host.clone(),
                    device_type: device.device_type,
                    token,
                })
            }
            Err(e) => {
                warn!(host = %device.host, error = %e, "pairing failed");
                board.record_failed(index, e.to_string());
                None
            }
        }
    });

    let results = join_all(attempts).await;

    let failed = results.iter().filter(|r| r.is_none()).count();
    let paired: Vec<_> = results.into_iter().flatten().collect();
    if failed > 0 {
        warn!(failed, "some devices failed to pair");
    }
    info!(paired = paired.len(), failed, "pairing finished");

    Ok(BatchOutcome { paired, failed })
}

/// Discovery, operator confirmation, then batch pairing.
///
/// The name is checked before scanning. `on_found` sees each device as it
/// arrives; `confirm` sees the final list and resolves to `false` to
/// abort. `on_board` receives the status board before pairing starts, so
/// a renderer can subscribe to it.
#[allow(clippy::too_many_arguments)]
pub async fn discover_and_pair<D, T, F, C, Fut, B>(
    discovery: &D,
    api: &DeviceApi<T>,
    name: &str,
    scan: &ScanConfig,
    config: &PairingConfig,
    on_found: F,
    confirm: C,
    on_board: B,
) -> Result<BatchOutcome, CoreError>
where
    D: Discovery,
    T: JsonTransport,
    F: FnMut(&DiscoveredDevice),
    C: FnOnce(&[DiscoveredDevice]) -> Fut,
    Fut: Future<Output = bool>,
    B: FnOnce(&PairingBoard),
{
    validate_name(name)?;

    let devices = discover_devices(discovery, scan, on_found, confirm).await?;
    let board = PairingBoard::new(&devices, config.max_attempts);
    on_board(&board);

    pair_batch(api, &devices, name, config, &board).await
}
