//! Verification probe
//!
//! Confirms a freshly provisioned listener actually works, independently of
//! the command channel: connect to the host on the inbound port and run a
//! TLS handshake with the masking domain as SNI. Handshake completion is
//! the only success signal; certificate trust is irrelevant because reality
//! masquerades by redirecting unauthenticated probes, not by presenting a
//! trusted certificate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{info, warn};

use veil_xray::INBOUND_PORT;

/// Post-restart verification seam; the orchestrator never learns more than
/// pass/fail.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn verify(&self, host: &str, mask_domain: &str) -> bool;
}

#[derive(Debug, Error)]
enum ProbeFailure {
    #[error("connection timed out")]
    ConnectTimeout,

    #[error("connection failed: {0}")]
    Connect(std::io::Error),

    #[error("invalid server name: {0}")]
    ServerName(rustls::pki_types::InvalidDnsNameError),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("handshake failed: {0}")]
    Handshake(std::io::Error),
}

/// Real TLS handshake probe.
///
/// Waits out a settle delay first so the remote service restart can finish,
/// then bounds every network operation so the probe cannot hang the
/// workflow.
#[derive(Debug, Clone)]
pub struct TlsProbe {
    port: u16,
    settle_delay: Duration,
    timeout: Duration,
}

impl TlsProbe {
    pub fn new() -> Self {
        Self {
            port: INBOUND_PORT,
            settle_delay: Duration::from_secs(3),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn handshake(&self, host: &str, mask_domain: &str) -> Result<(), ProbeFailure> {
        let addr = format!("{}:{}", host, self.port);
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProbeFailure::ConnectTimeout)?
            .map_err(ProbeFailure::Connect)?;

        let connector = insecure_tls_connector();
        let server_name = rustls::pki_types::ServerName::try_from(mask_domain.to_string())
            .map_err(ProbeFailure::ServerName)?;

        tokio::time::timeout(self.timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| ProbeFailure::HandshakeTimeout)?
            .map_err(ProbeFailure::Handshake)?;

        Ok(())
    }
}

impl Default for TlsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for TlsProbe {
    async fn verify(&self, host: &str, mask_domain: &str) -> bool {
        tokio::time::sleep(self.settle_delay).await;

        match self.handshake(host, mask_domain).await {
            Ok(()) => {
                info!(host, sni = mask_domain, "proxy verification successful");
                true
            }
            Err(e) => {
                warn!(host, sni = mask_domain, error = %e, "proxy verification failed");
                false
            }
        }
    }
}

fn insecure_tls_connector() -> tokio_rustls::TlsConnector {
    ensure_crypto_provider();

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(SkipVerification::new())
        .with_no_client_auth();

    tokio_rustls::TlsConnector::from(Arc::new(config))
}

static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            // Already installed
        }
    });
}

/// Accepts any certificate; the probe only cares whether the handshake
/// itself completes.
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        use rustls::SignatureScheme;
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn fast_probe(port: u16) -> TlsProbe {
        TlsProbe::new()
            .with_port(port)
            .with_settle_delay(Duration::from_millis(0))
            .with_timeout(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn refused_connection_is_false_not_panic() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = fast_probe(port);
        assert!(!probe.verify("127.0.0.1", "cdn.example.com").await);
    }

    #[tokio::test]
    async fn garbage_handshake_is_false() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(b"not a tls server\r\n").await;
                let _ = socket.shutdown().await;
            }
        });

        let probe = fast_probe(port);
        assert!(!probe.verify("127.0.0.1", "cdn.example.com").await);
    }

    #[tokio::test]
    async fn silent_server_times_out_to_false() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Accept and hold the socket open without ever answering the hello.
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            }
        });

        let probe = fast_probe(port);
        assert!(!probe.verify("127.0.0.1", "cdn.example.com").await);
    }
}
