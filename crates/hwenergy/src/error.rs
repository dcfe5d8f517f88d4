//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text and distinct exit codes.

use miette::Diagnostic;
use thiserror::Error;

use hwenergy_config::ConfigError;
use hwenergy_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const ABORTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {target}")]
    #[diagnostic(
        code(hwenergy::connection_failed),
        help(
            "Check that the device is powered on and on the same network.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { target: String, reason: String },

    #[error("Device stream is not connected")]
    #[diagnostic(code(hwenergy::not_connected))]
    NotConnected,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Device rejected the token")]
    #[diagnostic(
        code(hwenergy::auth_failed),
        help(
            "The token may have been revoked on the device: {message}\n\
             Pair again with: hwenergy pair-one <host> --name <name>"
        )
    )]
    AuthFailed { message: String },

    #[error("No token configured for device '{name}'")]
    #[diagnostic(
        code(hwenergy::no_token),
        help("Set `token` or `token_env` for this device in the config file.")
    )]
    NoToken { name: String },

    // ── Pairing ──────────────────────────────────────────────────────
    #[error("Invalid name '{name}'")]
    #[diagnostic(
        code(hwenergy::invalid_name),
        help("Use 1-40 characters: a-z, A-Z, 0-9, space, and - _ \\ / #")
    )]
    InvalidName { name: String },

    #[error("Pairing with {host} timed out after {seconds}s")]
    #[diagnostic(
        code(hwenergy::pairing_timeout),
        help("Press the button on the device right after starting the command.")
    )]
    PairingTimeout { host: String, seconds: u64 },

    #[error("Pairing with {host} was rejected: {message}")]
    #[diagnostic(code(hwenergy::pairing_rejected))]
    PairingRejected { host: String, message: String },

    #[error("No device could be paired ({failed} failed)")]
    #[diagnostic(
        code(hwenergy::pairing_failed),
        help("Press the button on every device within three minutes, then try again.")
    )]
    NothingPaired { failed: usize },

    // ── Discovery ────────────────────────────────────────────────────
    #[error("No devices found")]
    #[diagnostic(
        code(hwenergy::no_devices),
        help("Check the --host values and that the local API is enabled on each device.")
    )]
    NoDevicesFound,

    #[error("Discovery aborted")]
    #[diagnostic(
        code(hwenergy::aborted),
        help("Please ensure all devices are powered on and on the same network, then try again.")
    )]
    Aborted,

    // ── Devices ──────────────────────────────────────────────────────
    #[error("Device '{name}' not found in configuration")]
    #[diagnostic(
        code(hwenergy::unknown_device),
        help("Pair it with: hwenergy pair --name <name> --host <host> --save")
    )]
    UnknownDevice { name: String },

    #[error("'{device}' does not support {operation}")]
    #[diagnostic(code(hwenergy::unsupported), help("{hint}"))]
    Unsupported {
        device: String,
        operation: String,
        hint: String,
    },

    #[error("No fresh data from the device")]
    #[diagnostic(
        code(hwenergy::stale),
        help("Nothing arrived within the last {seconds}s. Check the device connection.")
    )]
    Stale { seconds: u64 },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error: {message}")]
    #[diagnostic(code(hwenergy::api_error))]
    Api { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hwenergy::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Failed to load configuration")]
    #[diagnostic(code(hwenergy::config), help("Check the file at {path}"))]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(hwenergy::timeout),
        help("Increase the timeout with --timeout or check that the device is reachable.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(hwenergy::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NotConnected => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoToken { .. } => exit_code::AUTH,
            Self::UnknownDevice { .. } | Self::NoDevicesFound => exit_code::NOT_FOUND,
            Self::Aborted => exit_code::ABORTED,
            Self::Timeout { .. } | Self::PairingTimeout { .. } | Self::Stale { .. } => {
                exit_code::TIMEOUT
            }
            Self::InvalidName { .. } | Self::Validation { .. } | Self::Unsupported { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidName { name } => Self::InvalidName { name },
            CoreError::InvalidMode { mode } => Self::Validation {
                field: "mode".into(),
                reason: format!("'{mode}' cannot be requested"),
            },
            CoreError::Stale { max_age } => Self::Stale {
                seconds: max_age.as_secs(),
            },
            CoreError::NotConnected => Self::NotConnected,
            CoreError::ConnectionFailed { target, reason } => {
                Self::ConnectionFailed { target, reason }
            }
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::PairingRejected { host, message, .. } => {
                Self::PairingRejected { host, message }
            }
            CoreError::PairingTimeout { host, timeout_secs } => Self::PairingTimeout {
                host,
                seconds: timeout_secs,
            },
            CoreError::DiscoveryAborted => Self::Aborted,
            CoreError::NoDevicesFound => Self::NoDevicesFound,
            CoreError::Decode { message } | CoreError::Api { message, .. } => {
                Self::Api { message }
            }
        }
    }
}

impl From<hwenergy_api::Error> for CliError {
    fn from(err: hwenergy_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

impl CliError {
    /// Wrap a config error, keeping the file path for the help text.
    pub fn config(err: ConfigError, path: &std::path::Path) -> Self {
        match err {
            ConfigError::UnknownDevice { name } => Self::UnknownDevice { name },
            ConfigError::NoToken { name } => Self::NoToken { name },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Core(core) => core.into(),
            ConfigError::Io(io) => Self::Io(io),
            other => Self::Config {
                path: path.display().to_string(),
                source: other,
            },
        }
    }
}
