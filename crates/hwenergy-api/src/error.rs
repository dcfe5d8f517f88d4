use thiserror::Error;

/// Top-level error type for the `hwenergy-api` crate.
///
/// Covers every failure mode of the two device surfaces: the HTTP JSON
/// API and the persistent WebSocket stream. `hwenergy-core` maps these
/// into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Operation timed out.
    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── HTTP API ────────────────────────────────────────────────────
    /// Non-success HTTP status, with the raw response body.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the device.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The device refused the token during the stream handshake.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// A message was sent while the stream was not connected.
    #[error("Not connected")]
    NotConnected,

    /// The connection was stopped and cannot be restarted.
    #[error("Connection stopped")]
    Stopped,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` when the device answered 403 to a token request,
    /// meaning the physical button has not been pressed yet.
    pub fn is_authorization_pending(&self) -> bool {
        matches!(self, Self::Http { status: 403, .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } => {
                true
            }
            _ => false,
        }
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Build a [`Error::Deserialization`] with a short body preview.
    pub fn deserialization(err: &serde_json::Error, body: &str) -> Self {
        let preview: String = body.chars().take(200).collect();
        Self::Deserialization {
            message: format!("{err} (body preview: {preview:?})"),
            body: body.to_owned(),
        }
    }
}
