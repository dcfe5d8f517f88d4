#![allow(clippy::unwrap_used)]

// Integration tests for `StreamConnection` against an in-process fake
// device speaking the stream protocol over plain `ws://`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::value::RawValue;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use hwenergy_api::{
    Error, LinkState, MessageHandler, ReconnectConfig, StreamConfig, StreamConnection,
};

const TOKEN: &str = "0123456789ABCDEF";

// ── Fake device ─────────────────────────────────────────────────────

type DeviceSocket = WebSocketStream<TcpStream>;

async fn listen() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = Url::parse(&format!("ws://{addr}/api/ws")).unwrap();
    (listener, url)
}

async fn accept(listener: &TcpListener) -> DeviceSocket {
    let (tcp, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(tcp).await.unwrap()
}

async fn recv_json(ws: &mut DeviceSocket) -> Option<Value> {
    loop {
        match ws.next().await? {
            Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

async fn send_json(ws: &mut DeviceSocket, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Run the device side of the handshake; returns the subscribed topics.
async fn authorize(ws: &mut DeviceSocket, topics: usize) -> Vec<String> {
    send_json(ws, &json!({ "type": "authorization_requested", "data": { "api_version": "2.0.0" } })).await;

    let auth = recv_json(ws).await.unwrap();
    assert_eq!(auth, json!({ "type": "authorization", "data": TOKEN }));
    send_json(ws, &json!({ "type": "authorized" })).await;

    let mut subscribed = Vec::new();
    for _ in 0..topics {
        let sub = recv_json(ws).await.unwrap();
        assert_eq!(sub["type"], "subscribe");
        subscribed.push(sub["data"].as_str().unwrap().to_string());
    }
    subscribed
}

/// Keep the socket open until the client goes away.
async fn hold(mut ws: DeviceSocket) {
    while recv_json(&mut ws).await.is_some() {}
}

// ── Client helpers ──────────────────────────────────────────────────

fn channel_handler() -> (MessageHandler, mpsc::UnboundedReceiver<(String, Value)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: MessageHandler = Arc::new(move |kind: &str, data: &RawValue| {
        let value: Value = serde_json::from_str(data.get()).unwrap();
        let _ = tx.send((kind.to_string(), value));
        Ok(())
    });
    (handler, rx)
}

fn config(url: Url, topics: &[&str]) -> StreamConfig {
    let mut config = StreamConfig::new(url, SecretString::from(TOKEN.to_string()), topics.iter().copied());
    config.reconnect = ReconnectConfig {
        delay: Duration::from_millis(50),
        handshake_timeout: Duration::from_secs(5),
    };
    config
}

async fn next_message(rx: &mut mpsc::UnboundedReceiver<(String, Value)>) -> (String, Value) {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("handler channel closed")
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_handshake_subscribes_and_delivers_in_order() {
    let (listener, url) = listen().await;

    let device = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let topics = authorize(&mut ws, 2).await;
        for seq in 0..25 {
            send_json(&mut ws, &json!({ "type": "measurement", "data": { "power_w": seq } })).await;
        }
        hold(ws).await;
        topics
    });

    let (handler, mut rx) = channel_handler();
    let conn = StreamConnection::new(config(url, &["measurement", "batteries"]), handler);
    conn.start_and_wait(Duration::from_secs(5)).await.unwrap();
    assert_eq!(conn.state(), LinkState::Connected);

    for seq in 0..25 {
        let (kind, data) = next_message(&mut rx).await;
        assert_eq!(kind, "measurement");
        assert_eq!(data["power_w"], seq);
    }

    conn.stop();
    let topics = device.await.unwrap();
    assert_eq!(topics, vec!["measurement".to_string(), "batteries".to_string()]);
}

#[tokio::test]
async fn test_rejected_token_fails_start() {
    let (listener, url) = listen().await;

    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_json(&mut ws, &json!({ "type": "authorization_requested" })).await;
        let _ = recv_json(&mut ws).await;
        send_json(&mut ws, &json!({ "type": "error", "data": { "message": "user:unauthorized" } })).await;
        hold(ws).await;
    });

    let (handler, _rx) = channel_handler();
    let conn = StreamConnection::new(config(url, &["measurement"]), handler);
    let err = conn.start_and_wait(Duration::from_secs(5)).await.unwrap_err();

    match err {
        Error::Authentication { message } => assert_eq!(message, "user:unauthorized"),
        other => panic!("expected Authentication error, got {other:?}"),
    }
    assert_eq!(conn.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_reconnects_after_link_loss() {
    let (listener, url) = listen().await;

    tokio::spawn(async move {
        let mut first = accept(&listener).await;
        authorize(&mut first, 1).await;
        send_json(&mut first, &json!({ "type": "measurement", "data": { "session": 1 } })).await;
        first.close(None).await.unwrap();
        drop(first);

        let mut second = accept(&listener).await;
        authorize(&mut second, 1).await;
        send_json(&mut second, &json!({ "type": "measurement", "data": { "session": 2 } })).await;
        hold(second).await;
    });

    let (handler, mut rx) = channel_handler();
    let conn = StreamConnection::new(config(url, &["measurement"]), handler);
    let mut states = conn.subscribe_state();
    conn.start_and_wait(Duration::from_secs(5)).await.unwrap();

    assert_eq!(next_message(&mut rx).await.1["session"], 1);
    assert_eq!(next_message(&mut rx).await.1["session"], 2);

    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == LinkState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    conn.stop();
}

#[tokio::test]
async fn test_send_reaches_device_while_connected() {
    let (listener, url) = listen().await;
    let (got_tx, got_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        authorize(&mut ws, 1).await;
        let frame = recv_json(&mut ws).await.unwrap();
        let _ = got_tx.send(frame);
        hold(ws).await;
    });

    let (handler, _rx) = channel_handler();
    let conn = StreamConnection::new(config(url, &["batteries"]), handler);
    conn.start_and_wait(Duration::from_secs(5)).await.unwrap();

    let msg = json!({ "type": "batteries", "data": { "mode": "zero" } });
    conn.send(&msg).unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), got_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, msg);

    conn.stop();
}

#[tokio::test]
async fn test_stop_is_terminal() {
    let (listener, url) = listen().await;
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        authorize(&mut ws, 1).await;
        hold(ws).await;
        let _ = closed_tx.send(());
    });

    let (handler, _rx) = channel_handler();
    let conn = StreamConnection::new(config(url, &["measurement"]), handler);
    conn.start_and_wait(Duration::from_secs(5)).await.unwrap();

    conn.stop();
    conn.stop();
    assert_eq!(conn.state(), LinkState::Disconnected);
    assert!(matches!(conn.send(&json!({})), Err(Error::NotConnected)));

    // the device sees the session end
    tokio::time::timeout(Duration::from_secs(5), closed_rx)
        .await
        .unwrap()
        .unwrap();

    let restarted = conn.start().await.unwrap();
    assert!(matches!(restarted, Err(Error::Stopped)));
}

#[tokio::test]
async fn test_silent_device_times_out() {
    let (listener, url) = listen().await;

    tokio::spawn(async move {
        let ws = accept(&listener).await;
        hold(ws).await;
    });

    let (handler, _rx) = channel_handler();
    let conn = StreamConnection::new(config(url, &["measurement"]), handler);
    let err = conn
        .start_and_wait(Duration::from_millis(300))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
    assert_eq!(conn.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_malformed_frames_do_not_break_the_stream() {
    let (listener, url) = listen().await;

    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        authorize(&mut ws, 1).await;
        ws.send(Message::text("definitely not json")).await.unwrap();
        send_json(&mut ws, &json!({ "type": "measurement" })).await;
        send_json(&mut ws, &json!({ "type": "measurement", "data": { "power_w": 42 } })).await;
        hold(ws).await;
    });

    let (handler, mut rx) = channel_handler();
    let conn = StreamConnection::new(config(url, &["measurement"]), handler);
    conn.start_and_wait(Duration::from_secs(5)).await.unwrap();

    let (kind, data) = next_message(&mut rx).await;
    assert_eq!(kind, "measurement");
    assert_eq!(data["power_w"], 42);
    assert_eq!(conn.state(), LinkState::Connected);

    conn.stop();
}

#[tokio::test]
async fn test_send_when_never_started() {
    let (_listener, url) = listen().await;
    let (handler, _rx) = channel_handler();
    let conn = StreamConnection::new(config(url, &["measurement"]), handler);

    let err = conn.send(&json!({ "type": "batteries" })).unwrap_err();
    assert!(matches!(err, Error::NotConnected));
}
