// hwenergy-api: Async Rust client for the local v2 API of HomeWizard-style
// energy devices (HTTP + WebSocket)

pub mod error;
pub mod http;
pub mod models;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use http::{DeviceApi, HttpTransport, JsonRequest, JsonTransport, device_base_url};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{
    LinkState, MessageHandler, ReconnectConfig, StreamConfig, StreamConnection, device_stream_url,
};
