//! Persistent, authenticated WebSocket stream to a single device.
//!
//! A [`StreamConnection`] owns one background task that connects to
//! `wss://<host>/api/ws`, answers the token challenge, subscribes to the
//! configured topics and then forwards every inbound `(type, data)` pair
//! to a handler. On link loss it waits a fixed delay and reconnects,
//! forever, until [`stop`](StreamConnection::stop) is called.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use hwenergy_api::websocket::{StreamConfig, StreamConnection};
//!
//! let config = StreamConfig::new(url, token, ["measurement"]);
//! let conn = StreamConnection::new(config, Arc::new(|kind, data| {
//!     println!("{kind}: {}", data.get());
//!     Ok(())
//! }));
//!
//! conn.start_and_wait(Duration::from_secs(10)).await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::Connector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Callback receiving `(message type, raw payload)` for every inbound
/// message after the handshake. Errors are logged and the stream carries on.
pub type MessageHandler = Arc<dyn Fn(&str, &RawValue) -> Result<(), Error> + Send + Sync>;

// ── LinkState ────────────────────────────────────────────────────────

/// Observable state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

// ── Configuration ────────────────────────────────────────────────────

/// Reconnection policy: fixed delay, unbounded retries.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay between link loss and the next connection attempt. Default: 5s.
    pub delay: Duration,

    /// Upper bound on connect + authorize + subscribe. Default: 10s.
    pub handshake_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything needed to open the stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: Url,
    pub token: SecretString,
    pub topics: Vec<String>,
    pub transport: TransportConfig,
    pub reconnect: ReconnectConfig,
}

impl StreamConfig {
    pub fn new<I, S>(url: Url, token: SecretString, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            url,
            token,
            topics: topics.into_iter().map(Into::into).collect(),
            transport: TransportConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Stream URL of a device (`wss://<host>/api/ws`).
pub fn device_stream_url(host: &str) -> Result<Url, Error> {
    Ok(Url::parse(&format!("wss://{host}/api/ws"))?)
}

// ── StreamConnection ─────────────────────────────────────────────────

/// Handle to one device stream. Dropping it stops the background task.
pub struct StreamConnection {
    inner: Arc<Inner>,
}

struct Inner {
    config: StreamConfig,
    handler: MessageHandler,
    state: watch::Sender<LinkState>,
    /// Writer queue of the live session; `Some` only while connected.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl StreamConnection {
    pub fn new(config: StreamConfig, handler: MessageHandler) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                state,
                outbound: Mutex::new(None),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    /// Watch link state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// Spawn the connection task.
    ///
    /// The returned receiver resolves once with the outcome of the first
    /// handshake. A failed first handshake does not stop the task: it keeps
    /// reconnecting until [`stop`](Self::stop). Calling `start` again on a
    /// running connection resolves once the link is connected.
    pub fn start(&self) -> oneshot::Receiver<Result<(), Error>> {
        let (ready_tx, ready_rx) = oneshot::channel();

        if self.inner.cancel.is_cancelled() {
            let _ = ready_tx.send(Err(Error::Stopped));
            return ready_rx;
        }

        if self.inner.started.swap(true, Ordering::SeqCst) {
            let mut state = self.inner.state.subscribe();
            let cancel = self.inner.cancel.clone();
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(Error::Stopped),
                    res = state.wait_for(|s| *s == LinkState::Connected) => {
                        res.map(|_| ()).map_err(|_| Error::Stopped)
                    }
                };
                let _ = ready_tx.send(outcome);
            });
            return ready_rx;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(run(inner, ready_tx));
        ready_rx
    }

    /// Start and wait up to `timeout` for the first handshake.
    ///
    /// On failure or timeout the connection is stopped.
    pub async fn start_and_wait(&self, timeout: Duration) -> Result<(), Error> {
        let ready = self.start();

        match tokio::time::timeout(timeout, ready).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => {
                self.stop();
                Err(e)
            }
            Ok(Err(_)) => {
                self.stop();
                Err(Error::Stopped)
            }
            Err(_) => {
                self.stop();
                Err(Error::Timeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Stop the connection for good. Valid from any state.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
        self.inner.clear_outbound();
        self.inner.state.send_replace(LinkState::Disconnected);
    }

    /// Queue one message on the live session.
    ///
    /// Fails with [`Error::NotConnected`] unless the link is connected.
    /// Nothing is buffered for a later session.
    pub fn send<T: Serialize>(&self, message: &T) -> Result<(), Error> {
        if self.state() != LinkState::Connected {
            return Err(Error::NotConnected);
        }

        let text = serde_json::to_string(message).map_err(|e| Error::Deserialization {
            message: format!("failed to encode message: {e}"),
            body: String::new(),
        })?;

        let guard = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx
                .send(Message::text(text))
                .map_err(|_| Error::NotConnected),
            None => Err(Error::NotConnected),
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl Inner {
    fn set_state(&self, state: LinkState) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.state.send_replace(state);
    }

    fn set_outbound(&self, tx: mpsc::UnboundedSender<Message>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    fn clear_outbound(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → handshake → read → on loss, wait → reconnect.
async fn run(inner: Arc<Inner>, ready: oneshot::Sender<Result<(), Error>>) {
    let mut ready = Some(ready);
    let mut attempt: u32 = 0;

    loop {
        inner.set_state(LinkState::Connecting);

        let result = session(&inner, &mut ready).await;

        inner.clear_outbound();
        if inner.cancel.is_cancelled() {
            break;
        }

        if ready.is_none() && *inner.state.borrow() == LinkState::Connected {
            attempt = 0;
        }

        match result {
            Ok(()) => info!(url = %inner.config.url, "device stream closed, reconnecting"),
            Err(e) => {
                warn!(url = %inner.config.url, error = %e, attempt, "device stream error");
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(e));
                }
            }
        }

        attempt = attempt.saturating_add(1);
        inner.set_state(LinkState::Reconnecting { attempt });

        let delay = inner.config.reconnect.delay;
        debug!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    if let Some(tx) = ready.take() {
        let _ = tx.send(Err(Error::Stopped));
    }
    inner.state.send_replace(LinkState::Disconnected);
    debug!(url = %inner.config.url, "device stream task exiting");
}

// ── Single session ───────────────────────────────────────────────────

/// One transport session: connect, handshake, then pump frames until the
/// link drops or the connection is cancelled.
async fn session(
    inner: &Inner,
    ready: &mut Option<oneshot::Sender<Result<(), Error>>>,
) -> Result<(), Error> {
    let config = &inner.config;
    let handshake_timeout = config.reconnect.handshake_timeout;
    info!(url = %config.url, "connecting to device stream");

    let request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
    let connector = config.transport.websocket_tls()?.map(Connector::Rustls);

    let connect = tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector);
    let ws_stream = tokio::select! {
        biased;
        () = inner.cancel.cancelled() => return Ok(()),
        res = tokio::time::timeout(handshake_timeout, connect) => {
            let (ws_stream, _response) = res
                .map_err(|_| Error::Timeout { timeout_secs: handshake_timeout.as_secs() })?
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            ws_stream
        }
    };

    let (mut write, mut read) = ws_stream.split();

    tokio::select! {
        biased;
        () = inner.cancel.cancelled() => return Ok(()),
        res = tokio::time::timeout(
            handshake_timeout,
            handshake(&mut write, &mut read, &config.token, &config.topics),
        ) => {
            res.map_err(|_| Error::Timeout { timeout_secs: handshake_timeout.as_secs() })??;
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    inner.set_outbound(tx);
    inner.set_state(LinkState::Connected);
    info!(url = %config.url, topics = ?config.topics, "device stream connected");
    if let Some(tx) = ready.take() {
        let _ = tx.send(Ok(()));
    }

    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => {
                // Flush what was queued before the stop.
                while let Ok(msg) = rx.try_recv() {
                    let _ = write.send(msg).await;
                }
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            Some(msg) = rx.recv() => {
                write.send(msg).await.map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => dispatch(&inner.handler, &text),
                    Some(Ok(Message::Ping(_))) => {
                        trace!("device stream ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(match frame {
                            Some(cf) => Error::WebSocketClosed {
                                code: u16::from(cf.code),
                                reason: cf.reason.as_str().to_owned(),
                            },
                            None => Error::WebSocketClosed {
                                code: 1005,
                                reason: "no close payload".into(),
                            },
                        });
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        return Err(Error::WebSocketClosed {
                            code: 1006,
                            reason: "stream ended without close frame".into(),
                        });
                    }
                    Some(Ok(_)) => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Handshake ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Outbound<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: T,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    message: String,
}

/// Answer the token challenge, then subscribe to every topic.
///
/// The device sends no acknowledgement for subscriptions; the handshake
/// completes once the subscribe frames are flushed.
async fn handshake<W, R>(
    write: &mut W,
    read: &mut R,
    token: &SecretString,
    topics: &[String],
) -> Result<(), Error>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let envelope = next_envelope(read).await?;
        match envelope.kind.as_str() {
            "authorization_requested" => {
                send_json(
                    write,
                    &Outbound {
                        kind: "authorization",
                        data: token.expose_secret(),
                    },
                )
                .await?;
            }
            "authorized" => break,
            "error" => {
                return Err(Error::Authentication {
                    message: error_message(envelope.data.as_deref()),
                });
            }
            other => trace!(msg_type = other, "ignoring message before authorization"),
        }
    }

    for topic in topics {
        write
            .feed(Message::text(encode(&Outbound {
                kind: "subscribe",
                data: topic.as_str(),
            })?))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
    }
    write
        .flush()
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))
}

async fn next_envelope<R>(read: &mut R) -> Result<Envelope, Error>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).map_err(|e| Error::deserialization(&e, &text));
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|cf| (u16::from(cf.code), cf.reason.as_str().to_owned()))
                    .unwrap_or((1005, "closed during handshake".into()));
                return Err(Error::WebSocketClosed { code, reason });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
            None => {
                return Err(Error::WebSocketClosed {
                    code: 1006,
                    reason: "stream ended during handshake".into(),
                });
            }
        }
    }
}

async fn send_json<W, T>(write: &mut W, message: &T) -> Result<(), Error>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    T: Serialize,
{
    write
        .send(Message::text(encode(message)?))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))
}

fn encode<T: Serialize>(message: &T) -> Result<String, Error> {
    serde_json::to_string(message).map_err(|e| Error::Deserialization {
        message: format!("failed to encode message: {e}"),
        body: String::new(),
    })
}

fn error_message(data: Option<&RawValue>) -> String {
    let Some(raw) = data else {
        return "device rejected the token".into();
    };
    serde_json::from_str::<ErrorData>(raw.get())
        .map(|d| d.message)
        .unwrap_or_else(|_| raw.get().to_owned())
}

// ── Message dispatch ─────────────────────────────────────────────────

/// Decode the envelope of one text frame and hand it to the handler.
fn dispatch(handler: &MessageHandler, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "failed to parse device stream envelope");
            return;
        }
    };

    let Some(data) = envelope.data else {
        trace!(msg_type = %envelope.kind, "message without payload");
        return;
    };

    if let Err(e) = handler(&envelope.kind, &data) {
        warn!(msg_type = %envelope.kind, error = %e, "failed to handle device message");
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recording_handler() -> (MessageHandler, Arc<Mutex<Vec<(String, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler = Arc::new(move |kind: &str, data: &RawValue| {
            sink.lock()
                .unwrap()
                .push((kind.to_string(), data.get().to_string()));
            Ok(())
        });
        (handler, seen)
    }

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay, Duration::from_secs(5));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn stream_url_for_host() {
        let url = device_stream_url("10.0.0.7").unwrap();
        assert_eq!(url.as_str(), "wss://10.0.0.7/api/ws");
    }

    #[test]
    fn dispatch_forwards_raw_payload() {
        let (handler, seen) = recording_handler();
        dispatch(
            &handler,
            r#"{"type":"measurement","data":{"power_w": 12.5}}"#,
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "measurement");
        assert_eq!(seen[0].1, r#"{"power_w": 12.5}"#);
    }

    #[test]
    fn dispatch_skips_malformed_frames() {
        let (handler, seen) = recording_handler();
        dispatch(&handler, "not json at all");
        dispatch(&handler, r#"{"data":{}}"#);
        dispatch(&handler, r#"{"type":"authorized"}"#);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn dispatch_survives_handler_errors() {
        let handler: MessageHandler = Arc::new(|_: &str, data: &RawValue| {
            Err(Error::Deserialization {
                message: "bad".into(),
                body: data.get().into(),
            })
        });
        dispatch(&handler, r#"{"type":"measurement","data":[]}"#);
    }

    #[test]
    fn error_message_prefers_message_field() {
        let raw = RawValue::from_string(r#"{"message":"user:unauthorized"}"#.into()).unwrap();
        assert_eq!(error_message(Some(&raw)), "user:unauthorized");
        assert_eq!(error_message(None), "device rejected the token");
    }

    #[tokio::test]
    async fn send_before_start_is_not_connected() {
        let (handler, _) = recording_handler();
        let config = StreamConfig::new(
            Url::parse("ws://127.0.0.1:9/api/ws").unwrap(),
            SecretString::from("t".to_string()),
            ["measurement"],
        );
        let conn = StreamConnection::new(config, handler);

        assert_eq!(conn.state(), LinkState::Disconnected);
        let err = conn.send(&serde_json::json!({"type": "batteries"})).unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn start_after_stop_is_rejected() {
        let (handler, _) = recording_handler();
        let config = StreamConfig::new(
            Url::parse("ws://127.0.0.1:9/api/ws").unwrap(),
            SecretString::from("t".to_string()),
            ["measurement"],
        );
        let conn = StreamConnection::new(config, handler);
        conn.stop();

        let outcome = conn.start().await.unwrap();
        assert!(matches!(outcome, Err(Error::Stopped)));
        assert_eq!(conn.state(), LinkState::Disconnected);
    }
}
