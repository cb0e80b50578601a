//! Connection lifecycle.
//!
//! A [`CastConnection`] is either closed or holds one live link: an
//! authenticated stream with its own reader task, keepalive timer,
//! pending-request table and session set. Opening brings the link up in
//! a fixed order:
//!
//! ```text
//! connect ─▶ auth ─▶ PING ─▶ CONNECT(receiver-0) ─▶ keepalive timer ─▶ reader
//! ```
//!
//! With auto-reconnect on, any send on a closed connection opens a new
//! link first. Open and close are serialized by one lifecycle lock,
//! which callers only ever wait on for up to the request timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth;
use crate::codec::CastCodec;
use crate::config::ConnectionConfig;
use crate::correlator::Correlator;
use crate::dispatch::{ConnectionEvent, EventDispatcher};
use crate::error::CastError;
use crate::keepalive::Keepalive;
use crate::message::{Request, Response};
use crate::namespace::{DEFAULT_RECEIVER_ID, NS_CONNECTION};
use crate::reader::{self, ReaderContext, ReaderExit};
use crate::session::SessionSet;
use crate::transport::{Connector, connector_for};
use crate::writer::EnvelopeWriter;

/// Length of the random part of a generated sender id.
const SENDER_SUFFIX_LEN: usize = 10;

fn generate_sender_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SENDER_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("sender-{suffix}")
}

// ── Link ─────────────────────────────────────────────────────────

/// One authenticated stream and everything scoped to it.
struct Link {
    writer: EnvelopeWriter,
    correlator: Arc<Correlator>,
    sessions: SessionSet,
    token: CancellationToken,
    keepalive: JoinHandle<()>,
}

impl Link {
    /// Stop background work and release waiters. The reader task sees
    /// the cancellation and drops the read half.
    fn abort(&self) {
        self.token.cancel();
        self.keepalive.abort();
        self.correlator.fail_all();
    }

    /// [`abort`](Self::abort), then shut the write side down cleanly.
    async fn teardown(&self, write_timeout: Duration) {
        self.abort();
        let _ = tokio::time::timeout(write_timeout, self.writer.shutdown()).await;
    }
}

// ── Connection ───────────────────────────────────────────────────

struct Inner {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    sender_id: String,
    events: Arc<EventDispatcher>,
    link: Mutex<Option<Arc<Link>>>,
    open: AtomicBool,
    /// Shared with each link's writer as its write deadline.
    request_timeout_ms: Arc<AtomicU64>,
    auto_reconnect: AtomicBool,
}

/// Persistent control connection to one device.
///
/// Cheap to clone; clones share the link and the listener registries.
#[derive(Clone)]
pub struct CastConnection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CastConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CastConnection")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("sender_id", &self.inner.sender_id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl CastConnection {
    /// Create a closed connection using the transport the config names.
    pub fn new(config: ConnectionConfig) -> Result<Self, CastError> {
        let connector = connector_for(&config)?;
        Ok(Self::with_connector(config, connector))
    }

    /// Create a closed connection over a custom transport.
    pub fn with_connector(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let sender_id = config.sender_id.clone().unwrap_or_else(generate_sender_id);
        Self {
            inner: Arc::new(Inner {
                request_timeout_ms: Arc::new(AtomicU64::new(config.request_timeout_ms)),
                auto_reconnect: AtomicBool::new(config.auto_reconnect),
                config,
                connector,
                sender_id,
                events: Arc::new(EventDispatcher::new()),
                link: Mutex::new(None),
                open: AtomicBool::new(false),
            }),
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.inner.sender_id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Listener registries.
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.request_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_request_timeout(&self, timeout: Duration) {
        self.inner
            .request_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn auto_reconnect(&self) -> bool {
        self.inner.auto_reconnect.load(Ordering::Relaxed)
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.auto_reconnect.store(enabled, Ordering::Relaxed);
    }

    /// Requests currently waiting for a reply on the open link.
    pub async fn pending_requests(&self) -> usize {
        self.inner
            .link
            .lock()
            .await
            .as_ref()
            .map_or(0, |link| link.correlator.pending_count())
    }

    // ── Lifecycle ────────────────────────────────────────────────

    async fn lock_lifecycle(&self) -> Result<MutexGuard<'_, Option<Arc<Link>>>, CastError> {
        let limit = self.request_timeout();
        tokio::time::timeout(limit, self.inner.link.lock())
            .await
            .map_err(|_| CastError::Timeout(limit))
    }

    /// Connect, authenticate and start the background tasks.
    pub async fn open(&self) -> Result<(), CastError> {
        let mut guard = self.lock_lifecycle().await?;
        if guard.is_some() {
            return Err(CastError::AlreadyOpen);
        }
        self.establish(&mut guard).await?;
        drop(guard);
        self.inner.events.deliver_connection(&ConnectionEvent::Opened);
        Ok(())
    }

    /// Close the link. Pending requests fail with `ConnectionClosed`.
    pub async fn close(&self) -> Result<(), CastError> {
        let mut guard = self.lock_lifecycle().await?;
        let link = guard.take().ok_or(CastError::AlreadyClosed)?;
        self.inner.open.store(false, Ordering::Release);
        link.teardown(self.request_timeout()).await;
        drop(guard);

        info!(host = %self.inner.config.host, "connection closed");
        self.inner.events.deliver_connection(&ConnectionEvent::Closed);
        Ok(())
    }

    /// Current link, opening one when closed and the policy allows it.
    async fn ensure_open(&self) -> Result<Arc<Link>, CastError> {
        let mut guard = self.lock_lifecycle().await?;
        if let Some(link) = guard.as_ref() {
            return Ok(Arc::clone(link));
        }
        if !self.auto_reconnect() {
            return Err(CastError::NotConnected);
        }

        debug!("reopening closed connection");
        let link = self.establish(&mut guard).await?;
        drop(guard);
        self.inner.events.deliver_connection(&ConnectionEvent::Opened);
        Ok(link)
    }

    async fn establish(
        &self,
        slot: &mut Option<Arc<Link>>,
    ) -> Result<Arc<Link>, CastError> {
        let cfg = &self.inner.config;
        let limit = cfg.connect_timeout();

        let stream = self.inner.connector.connect(&cfg.host, cfg.port, limit).await?;
        let (read_half, write_half) = tokio::io::split(stream);
        let mut framed_read = FramedRead::new(read_half, CastCodec::default());
        let mut framed_write = FramedWrite::new(write_half, CastCodec::default());

        auth::authenticate(
            &mut framed_read,
            &mut framed_write,
            &self.inner.sender_id,
            limit,
        )
        .await?;

        let writer = EnvelopeWriter::new(framed_write, self.inner.sender_id.as_str())
            .with_timeout(Arc::clone(&self.inner.request_timeout_ms));
        let token = CancellationToken::new();

        let keepalive =
            Keepalive::spawn(writer.clone(), cfg.keepalive_interval(), token.clone()).await?;
        let link = Arc::new(Link {
            writer,
            correlator: Arc::new(Correlator::new()),
            sessions: SessionSet::new(),
            token,
            keepalive,
        });

        if let Err(e) = link.sessions.ensure(DEFAULT_RECEIVER_ID, &link.writer).await {
            link.teardown(limit).await;
            return Err(e);
        }

        self.spawn_reader(framed_read, &link);

        *slot = Some(Arc::clone(&link));
        self.inner.open.store(true, Ordering::Release);
        info!(host = %cfg.host, port = cfg.port, sender_id = %self.inner.sender_id, "connection open");
        Ok(link)
    }

    fn spawn_reader(
        &self,
        framed_read: FramedRead<tokio::io::ReadHalf<crate::transport::BoxedStream>, CastCodec>,
        link: &Arc<Link>,
    ) {
        let ctx = ReaderContext {
            correlator: Arc::clone(&link.correlator),
            events: Arc::clone(&self.inner.events),
            writer: link.writer.clone(),
        };
        let token = link.token.clone();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let owned = Arc::clone(link);

        tokio::spawn(async move {
            let exit = reader::run(framed_read, ctx, token).await;
            if matches!(exit, ReaderExit::Cancelled) {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                CastConnection { inner }.link_lost(&owned).await;
            }
        });
    }

    /// Close `link` after a transport failure, unless it was already
    /// replaced or closed. The stream is not flushed; it may be stuck or
    /// hold a partial frame.
    async fn link_lost(&self, link: &Arc<Link>) {
        let mut guard = self.inner.link.lock().await;
        let current = guard.as_ref().is_some_and(|l| Arc::ptr_eq(l, link));
        if !current {
            return;
        }
        guard.take();
        self.inner.open.store(false, Ordering::Release);
        link.abort();
        drop(guard);

        warn!(host = %self.inner.config.host, "connection lost");
        self.inner.events.deliver_connection(&ConnectionEvent::Closed);
    }

    // ── Sending ──────────────────────────────────────────────────

    /// Send `request` to `destination` on `namespace`.
    ///
    /// With `expect_reply` the call waits up to the request timeout for
    /// the correlated reply. Failure replies come back as errors.
    pub async fn send(
        &self,
        namespace: &str,
        destination: &str,
        request: impl Into<Request>,
        expect_reply: bool,
    ) -> Result<Option<Response>, CastError> {
        self.send_inner(namespace, destination, request.into(), expect_reply, None)
            .await
    }

    /// Send and wait for the reply.
    pub async fn request(
        &self,
        namespace: &str,
        destination: &str,
        request: impl Into<Request>,
    ) -> Result<Response, CastError> {
        self.send_inner(namespace, destination, request.into(), true, None)
            .await?
            .ok_or(CastError::InvalidState("reply expected"))
    }

    /// Like [`request`](Self::request), abandoning the wait with
    /// `Interrupted` when `cancel` fires.
    pub async fn request_cancellable(
        &self,
        namespace: &str,
        destination: &str,
        request: impl Into<Request>,
        cancel: &CancellationToken,
    ) -> Result<Response, CastError> {
        self.send_inner(namespace, destination, request.into(), true, Some(cancel))
            .await?
            .ok_or(CastError::InvalidState("reply expected"))
    }

    /// Fire-and-forget send.
    pub async fn notify(
        &self,
        namespace: &str,
        destination: &str,
        request: impl Into<Request>,
    ) -> Result<(), CastError> {
        self.send_inner(namespace, destination, request.into(), false, None)
            .await
            .map(|_| ())
    }

    async fn send_inner(
        &self,
        namespace: &str,
        destination: &str,
        request: Request,
        expect_reply: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Response>, CastError> {
        if expect_reply && !request.wants_request_id(true) {
            return Err(CastError::InvalidState("notifications have no reply"));
        }

        let link = self.ensure_open().await?;

        if destination != DEFAULT_RECEIVER_ID && namespace != NS_CONNECTION {
            if let Err(e) = link.sessions.ensure(destination, &link.writer).await {
                return Err(self.write_failed(&link, e).await);
            }
        }

        let pending = expect_reply.then(|| link.correlator.register());
        let request_id = match &pending {
            Some(p) => Some(p.id()),
            None if request.wants_request_id(false) => Some(link.correlator.next_request_id()),
            None => None,
        };

        if let Err(e) = link
            .writer
            .write_request(namespace, destination, &request, request_id)
            .await
        {
            return Err(self.write_failed(&link, e).await);
        }

        match pending {
            Some(pending) => {
                let response = pending.wait(self.request_timeout(), cancel).await?;
                Ok(Some(response.into_result()?))
            }
            None => Ok(None),
        }
    }

    /// A timed-out write may have left half a frame on the wire, so it
    /// ends the link like a transport error.
    async fn write_failed(&self, link: &Arc<Link>, error: CastError) -> CastError {
        if error.is_fatal() || matches!(error, CastError::Timeout(_)) {
            self.link_lost(link).await;
        }
        error
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_sender_id_shape() {
        let id = generate_sender_id();
        assert!(id.starts_with("sender-"));
        assert_eq!(id.len(), "sender-".len() + SENDER_SUFFIX_LEN);
        assert!(id["sender-".len()..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn configured_sender_id_is_kept() {
        let cfg = ConnectionConfig {
            sender_id: Some("sender-fixed".into()),
            ..ConnectionConfig::default().plaintext()
        };
        let conn = CastConnection::new(cfg).unwrap();
        assert_eq!(conn.sender_id(), "sender-fixed");
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn closed_without_reconnect_fails_fast() {
        let conn = CastConnection::new(ConnectionConfig::new("127.0.0.1", 1).plaintext()).unwrap();
        conn.set_auto_reconnect(false);
        let err = conn
            .request(
                crate::namespace::NS_RECEIVER,
                DEFAULT_RECEIVER_ID,
                crate::message::RequestBody::GetStatus,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::NotConnected));
        assert!(matches!(conn.close().await, Err(CastError::AlreadyClosed)));
    }

    #[test]
    fn timeout_setter() {
        let conn = CastConnection::new(ConnectionConfig::default().plaintext()).unwrap();
        conn.set_request_timeout(Duration::from_millis(100));
        assert_eq!(conn.request_timeout(), Duration::from_millis(100));
    }
}
