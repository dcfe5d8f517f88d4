use secrecy::SecretString;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use hwenergy_api::{DeviceApi, HttpTransport, JsonTransport, TransportConfig, device_base_url};

use super::{PairingConfig, validate_name};
use crate::error::CoreError;

/// Run the button-press handshake against one device.
///
/// The name is checked before any request goes out. The first token
/// request fires immediately, then one every `config.interval`, up to
/// `config.max_attempts` requests within `config.deadline`. A 403 answer
/// means "button not pressed yet" and is retried; any other failure ends
/// the attempt. `on_attempt` receives the 1-based attempt number before
/// each request.
pub async fn pair_device<T, F>(
    api: &DeviceApi<T>,
    host: &str,
    name: &str,
    config: &PairingConfig,
    mut on_attempt: F,
) -> Result<SecretString, CoreError>
where
    T: JsonTransport,
    F: FnMut(u32) + Send,
{
    validate_name(name)?;
    let base = device_base_url(host)?;

    let poll = async {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for attempt in 1..=config.max_attempts {
            ticker.tick().await;
            on_attempt(attempt);

            match api.request_token(&base, name).await {
                Ok(token) => {
                    info!(host, attempt, "device paired");
                    return Ok(token);
                }
                Err(e) if e.is_authorization_pending() => {
                    debug!(host, attempt, "waiting for button press");
                }
                Err(e) => {
                    warn!(host, attempt, error = %e, "pairing rejected");
                    return Err(CoreError::PairingRejected {
                        host: host.to_owned(),
                        status: e.status(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Err(timeout_error(host, config))
    };

    tokio::time::timeout(config.deadline, poll)
        .await
        .unwrap_or_else(|_| Err(timeout_error(host, config)))
}

/// [`pair_device`] over a fresh HTTP transport.
pub async fn pair_single<F>(
    host: &str,
    name: &str,
    config: &PairingConfig,
    transport: &TransportConfig,
    on_attempt: F,
) -> Result<SecretString, CoreError>
where
    F: FnMut(u32) + Send,
{
    validate_name(name)?;
    let api = DeviceApi::new(HttpTransport::new(transport)?);
    pair_device(&api, host, name, config, on_attempt).await
}

fn timeout_error(host: &str, config: &PairingConfig) -> CoreError {
    CoreError::PairingTimeout {
        host: host.to_owned(),
        timeout_secs: config.deadline.as_secs(),
    }
}
