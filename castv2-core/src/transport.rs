//! Byte-stream transports.
//!
//! The connection is written against [`Connector`], which yields a boxed
//! duplex stream. Receivers speak TLS on port 8009 and present
//! self-signed certificates, so [`TlsConnector`] can be told to accept
//! any certificate while still checking handshake signatures.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector as RustlsConnector;
use tracing::debug;

use crate::config::{ConnectionConfig, TlsConfig};
use crate::error::CastError;

/// Any duplex byte stream the connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens the byte stream a connection runs over.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `host:port`, with `timeout` bounding the whole
    /// establishment (TCP and any handshake).
    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<BoxedStream, CastError>;
}

/// Pick the connector the configuration asks for.
pub fn connector_for(config: &ConnectionConfig) -> Result<Arc<dyn Connector>, CastError> {
    if config.tls.enabled {
        Ok(Arc::new(TlsConnector::new(&config.tls)?))
    } else {
        Ok(Arc::new(TcpConnector))
    }
}

async fn tcp_connect(host: &str, port: u16, limit: Duration) -> Result<TcpStream, CastError> {
    let stream = timeout(limit, TcpStream::connect((host, port)))
        .await
        .map_err(|_| CastError::Timeout(limit))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

// ── Plain TCP ────────────────────────────────────────────────────

/// Plaintext TCP. For local stubs and TLS-terminating proxies.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<BoxedStream, CastError> {
        let stream = tcp_connect(host, port, timeout).await?;
        debug!(host, port, "tcp connected");
        Ok(Box::new(stream))
    }
}

// ── TLS ──────────────────────────────────────────────────────────

/// TCP plus a rustls client session (ring provider).
#[derive(Clone)]
pub struct TlsConnector {
    inner: RustlsConnector,
    server_name: Option<String>,
}

impl fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnector")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsConnector {
    /// Build from settings. Without `trust_any_certificate` the trust
    /// store is empty; use [`with_roots`](Self::with_roots) to supply one.
    pub fn new(tls: &TlsConfig) -> Result<Self, CastError> {
        Self::with_roots(tls, RootCertStore::empty())
    }

    pub fn with_roots(tls: &TlsConfig, roots: RootCertStore) -> Result<Self, CastError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?;

        let config = if tls.trust_any_certificate {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(TrustAnyCertificate { provider }))
                .with_no_client_auth()
        } else {
            builder.with_root_certificates(roots).with_no_client_auth()
        };

        Ok(Self {
            inner: RustlsConnector::from(Arc::new(config)),
            server_name: tls.server_name.clone(),
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        limit: Duration,
    ) -> Result<BoxedStream, CastError> {
        let name = self.server_name.as_deref().unwrap_or(host);
        let server_name = ServerName::try_from(name.to_owned())
            .map_err(|e| CastError::Tls(format!("invalid server name {name:?}: {e}")))?;

        let establish = async {
            let tcp = tcp_connect(host, port, limit).await?;
            self.inner
                .connect(server_name, tcp)
                .await
                .map_err(|e| CastError::Tls(format!("handshake failed: {e}")))
        };
        let stream = timeout(limit, establish)
            .await
            .map_err(|_| CastError::Timeout(limit))??;

        debug!(host, port, "tls session established");
        Ok(Box::new(stream))
    }
}

/// Accepts any server certificate; handshake signatures are still
/// verified against the presented key.
#[derive(Debug)]
struct TrustAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for TrustAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_connector_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = TcpConnector
            .connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        stream.write_all(b"cast").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"cast");
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpConnector
            .connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
    }

    #[test]
    fn connector_for_follows_config() {
        assert!(connector_for(&ConnectionConfig::default()).is_ok());
        assert!(connector_for(&ConnectionConfig::default().plaintext()).is_ok());
        let verifier_schemes = TrustAnyCertificate {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
        .supported_verify_schemes();
        assert!(!verifier_schemes.is_empty());
    }

    #[tokio::test]
    async fn invalid_server_name_is_tls_error() {
        let tls = TlsConfig {
            server_name: Some("not a valid name!".into()),
            ..TlsConfig::default()
        };
        let err = TlsConnector::new(&tls)
            .unwrap()
            .connect("127.0.0.1", 1, Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CastError::Tls(_)));
    }
}
