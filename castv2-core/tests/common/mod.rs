//! In-process stub receiver speaking the real framing over localhost.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use castv2_core::envelope::{Envelope, Payload};
use castv2_core::namespace::{NS_CONNECTION, NS_DEVICE_AUTH, NS_HEARTBEAT, NS_MEDIA, NS_RECEIVER};
use castv2_core::{CastCodec, ConnectionConfig};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;

pub type Handler = Arc<dyn Fn(&Envelope, &Value) -> Vec<Envelope> + Send + Sync>;

/// Out-of-band instructions for the live stub connection.
pub enum StubCommand {
    Push(Envelope),
    /// Bytes written as-is, bypassing the codec.
    PushRaw(Bytes),
    Hangup,
}

#[derive(Default)]
pub struct StubOptions {
    pub auth_error: Option<u8>,
    pub tls: Option<TlsAcceptor>,
}

pub struct StubReceiver {
    pub port: u16,
    received: Arc<Mutex<Vec<Envelope>>>,
    accepts: Arc<AtomicUsize>,
    control: mpsc::UnboundedSender<StubCommand>,
}

impl StubReceiver {
    pub async fn spawn(handler: Handler) -> Self {
        Self::spawn_with(handler, StubOptions::default()).await
    }

    pub async fn spawn_with(handler: Handler, options: StubOptions) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let accepts = Arc::new(AtomicUsize::new(0));
        let (control, control_rx) = mpsc::unbounded_channel();
        let control_rx = Arc::new(tokio::sync::Mutex::new(control_rx));

        let log = Arc::clone(&received);
        let count = Arc::clone(&accepts);
        tokio::spawn(async move {
            loop {
                let Ok((tcp, _)) = listener.accept().await else {
                    return;
                };
                count.fetch_add(1, Ordering::SeqCst);
                let handler = Arc::clone(&handler);
                let log = Arc::clone(&log);
                let control_rx = Arc::clone(&control_rx);
                let auth_error = options.auth_error;
                match &options.tls {
                    Some(acceptor) => {
                        let Ok(tls) = acceptor.accept(tcp).await else {
                            continue;
                        };
                        serve(tls, handler, log, control_rx, auth_error).await;
                    }
                    None => serve(tcp, handler, log, control_rx, auth_error).await,
                }
            }
        });

        Self {
            port,
            received,
            accepts,
            control,
        }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            sender_id: Some("sender-test".into()),
            ..ConnectionConfig::new("127.0.0.1", self.port).plaintext()
        }
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn push(&self, envelope: Envelope) {
        let _ = self.control.send(StubCommand::Push(envelope));
    }

    pub fn push_raw(&self, bytes: Bytes) {
        let _ = self.control.send(StubCommand::PushRaw(bytes));
    }

    pub fn hangup(&self) {
        let _ = self.control.send(StubCommand::Hangup);
    }

    /// Text envelopes received after authentication, in arrival order.
    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().unwrap().clone()
    }

    /// Parsed payloads received on `namespace`.
    pub fn payloads(&self, namespace: &str) -> Vec<Value> {
        self.received()
            .iter()
            .filter(|e| e.namespace == namespace)
            .filter_map(|e| serde_json::from_str(e.payload.as_text()?).ok())
            .collect()
    }

    /// Poll until `pred` holds for the received log or `limit` passes.
    pub async fn wait_for(&self, limit: Duration, pred: impl Fn(&[Envelope]) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if pred(&self.received()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

async fn serve<S>(
    stream: S,
    handler: Handler,
    log: Arc<Mutex<Vec<Envelope>>>,
    control: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<StubCommand>>>,
    auth_error: Option<u8>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, CastCodec::default());

    let Some(Ok(challenge)) = framed.next().await else {
        return;
    };
    assert_eq!(challenge.namespace, NS_DEVICE_AUTH);
    let reply_bytes = match auth_error {
        Some(kind) => Bytes::from(vec![0x1A, 0x02, 0x08, kind]),
        None => Bytes::from_static(&[0x12, 0x00]),
    };
    let auth_reply = Envelope::binary(
        challenge.destination_id.clone(),
        challenge.source_id.clone(),
        NS_DEVICE_AUTH,
        reply_bytes,
    );
    if framed.send(auth_reply).await.is_err() || auth_error.is_some() {
        return;
    }

    let mut control = control.lock().await;
    loop {
        tokio::select! {
            inbound = framed.next() => {
                let Some(Ok(envelope)) = inbound else { return };
                let Payload::Text(text) = &envelope.payload else { continue };
                let value: Value = serde_json::from_str(text).unwrap_or(Value::Null);
                log.lock().unwrap().push(envelope.clone());
                for out in handler(&envelope, &value) {
                    if framed.send(out).await.is_err() {
                        return;
                    }
                }
            }
            command = control.recv() => match command {
                Some(StubCommand::Push(envelope)) => {
                    if framed.send(envelope).await.is_err() {
                        return;
                    }
                }
                Some(StubCommand::PushRaw(bytes)) => {
                    let stream = framed.get_mut();
                    if stream.write_all(&bytes).await.is_err() || stream.flush().await.is_err() {
                        return;
                    }
                }
                Some(StubCommand::Hangup) | None => return,
            }
        }
    }
}

/// `RUST_LOG=castv2_core=trace cargo test` shows the wire traffic.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Address a reply back to the sender of `request`.
pub fn reply(request: &Envelope, payload: Value) -> Envelope {
    Envelope::text(
        request.destination_id.clone(),
        request.source_id.clone(),
        request.namespace.clone(),
        payload.to_string(),
    )
}

/// Unsolicited message from `receiver-0`.
pub fn broadcast(namespace: &str, payload: Value) -> Envelope {
    Envelope::text("receiver-0", "*", namespace, payload.to_string())
}

// ── Default receiver behaviour ───────────────────────────────────

#[derive(Default)]
struct ReceiverState {
    running: Option<String>,
    volume: f64,
    muted: bool,
    player_state: &'static str,
    current_time: f64,
}

fn status_json(state: &ReceiverState) -> Value {
    let applications: Vec<Value> = state
        .running
        .iter()
        .map(|app| {
            json!({
                "appId": app,
                "displayName": format!("App {app}"),
                "sessionId": format!("session-{app}"),
                "transportId": format!("transport-{app}"),
                "statusText": "Ready",
                "namespaces": [{"name": NS_MEDIA}]
            })
        })
        .collect();
    json!({
        "applications": applications,
        "volume": {"level": state.volume, "muted": state.muted, "increment": 0.1, "stepInterval": 0.1, "controlType": "attenuation"},
        "isActiveInput": true,
        "isStandBy": false
    })
}

fn media_json(state: &ReceiverState) -> Value {
    json!([{
        "mediaSessionId": 1,
        "playbackRate": 1,
        "playerState": state.player_state,
        "currentTime": state.current_time,
        "supportedMediaCommands": 15
    }])
}

/// A receiver that keeps enough state for launch/stop/volume/media.
///
/// `LOAD` of a content id containing `silent` is never answered;
/// one containing `fail` gets `LOAD_FAILED`. `LAUNCH` of `BAD` gets
/// `LAUNCH_ERROR`.
pub fn receiver_handler() -> Handler {
    let state = Arc::new(Mutex::new(ReceiverState {
        volume: 0.5,
        player_state: "IDLE",
        ..ReceiverState::default()
    }));

    Arc::new(move |request: &Envelope, value: &Value| {
        let mut state = state.lock().unwrap();
        let kind = value["type"].as_str().unwrap_or_default();
        let id = value["requestId"].clone();

        let out = match (request.namespace.as_str(), kind) {
            (NS_HEARTBEAT, "PING") => json!({"type": "PONG"}),
            (NS_CONNECTION, _) => return Vec::new(),
            (NS_RECEIVER, "GET_STATUS") => {
                json!({"type": "RECEIVER_STATUS", "requestId": id, "status": status_json(&state)})
            }
            (NS_RECEIVER, "GET_APP_AVAILABILITY") => {
                let mut availability = HashMap::new();
                for app in value["appId"].as_array().into_iter().flatten() {
                    let app = app.as_str().unwrap_or_default().to_owned();
                    let verdict = if app == "BAD" { "APP_UNAVAILABLE" } else { "APP_AVAILABLE" };
                    availability.insert(app, verdict);
                }
                json!({"type": "GET_APP_AVAILABILITY", "requestId": id, "availability": availability})
            }
            (NS_RECEIVER, "LAUNCH") => {
                let app = value["appId"].as_str().unwrap_or_default();
                if app == "BAD" {
                    json!({"type": "LAUNCH_ERROR", "requestId": id, "reason": "NOT_FOUND"})
                } else {
                    state.running = Some(app.to_owned());
                    json!({"type": "RECEIVER_STATUS", "requestId": id, "status": status_json(&state)})
                }
            }
            (NS_RECEIVER, "STOP") => {
                state.running = None;
                json!({"type": "RECEIVER_STATUS", "requestId": id, "status": status_json(&state)})
            }
            (NS_RECEIVER, "SET_VOLUME") => {
                if let Some(level) = value["volume"]["level"].as_f64() {
                    state.volume = level;
                }
                state.muted = value["volume"]["muted"].as_bool().unwrap_or(false);
                json!({"type": "RECEIVER_STATUS", "requestId": id, "status": status_json(&state)})
            }
            (NS_MEDIA, "GET_STATUS") => {
                json!({"type": "MEDIA_STATUS", "requestId": id, "status": media_json(&state)})
            }
            (NS_MEDIA, "LOAD") => {
                let content = value["media"]["contentId"].as_str().unwrap_or_default();
                if content.contains("silent") {
                    return Vec::new();
                }
                if content.contains("fail") {
                    json!({"type": "LOAD_FAILED", "requestId": id})
                } else {
                    state.player_state = "PLAYING";
                    state.current_time = 0.0;
                    json!({"type": "MEDIA_STATUS", "requestId": id, "status": media_json(&state)})
                }
            }
            (NS_MEDIA, "PLAY") => {
                state.player_state = "PLAYING";
                json!({"type": "MEDIA_STATUS", "requestId": id, "status": media_json(&state)})
            }
            (NS_MEDIA, "PAUSE") => {
                state.player_state = "PAUSED";
                json!({"type": "MEDIA_STATUS", "requestId": id, "status": media_json(&state)})
            }
            (NS_MEDIA, "SEEK") => {
                state.current_time = value["currentTime"].as_f64().unwrap_or_default();
                json!({"type": "MEDIA_STATUS", "requestId": id, "status": media_json(&state)})
            }
            _ => return Vec::new(),
        };
        vec![reply(request, out)]
    })
}

// ── TLS ──────────────────────────────────────────────────────────

pub fn self_signed_acceptor() -> TlsAcceptor {
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};

    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert.der().clone()], key)
    .unwrap();

    TlsAcceptor::from(Arc::new(config))
}
