// ── Core error types ──
//
// User-facing errors from hwenergy-core. Consumers never match on raw
// transport errors: the `From<hwenergy_api::Error>` impl translates them
// into domain-appropriate variants.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Input errors ─────────────────────────────────────────────────
    #[error(
        "Invalid name '{name}': must be 1-40 characters (a-z, A-Z, 0-9, -, _, \\, /, #, spaces)"
    )]
    InvalidName { name: String },

    #[error("Battery mode '{mode}' cannot be requested")]
    InvalidMode { mode: String },

    // ── Telemetry errors ─────────────────────────────────────────────
    /// No measurement newer than the freshness window.
    #[error("No fresh data within the last {max_age:?}")]
    Stale { max_age: Duration },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Device stream is not connected")]
    NotConnected,

    #[error("Cannot connect to {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("Device rejected the token: {message}")]
    AuthenticationFailed { message: String },

    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Pairing errors ───────────────────────────────────────────────
    #[error("Pairing with {host} rejected: {message}")]
    PairingRejected {
        host: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Pairing with {host} timed out after {timeout_secs}s (button not pressed?)")]
    PairingTimeout { host: String, timeout_secs: u64 },

    // ── Discovery errors ─────────────────────────────────────────────
    #[error("Discovery aborted")]
    DiscoveryAborted,

    #[error("No devices found on the network")]
    NoDevicesFound,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Failed to decode device data: {message}")]
    Decode { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },
}

impl CoreError {
    /// Returns `true` for every "no answer in time" condition: stale
    /// telemetry, pairing deadline, connection start timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Stale { .. } | Self::Timeout { .. } | Self::PairingTimeout { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hwenergy_api::Error> for CoreError {
    fn from(err: hwenergy_api::Error) -> Self {
        use hwenergy_api::Error as Api;

        match err {
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        target: e
                            .url()
                            .and_then(|u| u.host_str().map(str::to_owned))
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Api {
                message: format!("invalid URL: {e}"),
                status: None,
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::Tls(reason) => CoreError::ConnectionFailed {
                target: "TLS".into(),
                reason,
            },
            Api::Http { status, body } => CoreError::Api {
                message: if body.is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("HTTP {status}: {body}")
                },
                status: Some(status),
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                target: "device stream".into(),
                reason,
            },
            Api::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                target: "device stream".into(),
                reason: format!("closed (code {code}): {reason}"),
            },
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::NotConnected | Api::Stopped => CoreError::NotConnected,
            Api::Deserialization { message, .. } => CoreError::Decode { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_family() {
        assert!(
            CoreError::Stale {
                max_age: Duration::from_secs(30)
            }
            .is_timeout()
        );
        assert!(CoreError::Timeout { timeout_secs: 5 }.is_timeout());
        assert!(
            CoreError::PairingTimeout {
                host: "10.0.0.2".into(),
                timeout_secs: 180
            }
            .is_timeout()
        );
        assert!(!CoreError::NotConnected.is_timeout());
    }

    #[test]
    fn http_error_keeps_status() {
        let err: CoreError = hwenergy_api::Error::Http {
            status: 500,
            body: "boom".into(),
        }
        .into();
        match err {
            CoreError::Api { status, message } => {
                assert_eq!(status, Some(500));
                assert_eq!(message, "HTTP 500: boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stream_errors_map_to_connection_variants() {
        assert!(matches!(
            CoreError::from(hwenergy_api::Error::NotConnected),
            CoreError::NotConnected
        ));
        assert!(matches!(
            CoreError::from(hwenergy_api::Error::Authentication {
                message: "nope".into()
            }),
            CoreError::AuthenticationFailed { .. }
        ));
        assert!(matches!(
            CoreError::from(hwenergy_api::Error::WebSocketConnect("refused".into())),
            CoreError::ConnectionFailed { .. }
        ));
    }
}
