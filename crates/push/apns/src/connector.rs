//! Byte streams to the provider.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use push_core::{Credential, CredentialId, Endpoint, PushError};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::parse_identity;

/// A duplex stream HTTP/2 can run over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Boxed provider stream.
pub type BoxedIo = Box<dyn Io>;

/// Opens the byte stream a connection runs over.
#[trait_variant::make(Send)]
pub trait Connector: Send + Sync {
    /// Connect to `endpoint` authenticating with `credential` where the transport requires it.
    async fn connect(
        &self,
        endpoint: Endpoint,
        credential: &Credential,
    ) -> Result<BoxedIo, PushError>;
}

/// TLS connector with ALPN `h2` and optional client certificate.
pub struct TlsConnector {
    roots: Arc<rustls::RootCertStore>,
    connect_timeout: Duration,
    configs: Mutex<HashMap<CredentialId, Arc<rustls::ClientConfig>>>,
}

impl TlsConnector {
    /// Create a connector trusting the webpki root set.
    pub fn new(connect_timeout: Duration) -> Self {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };

        Self {
            roots: Arc::new(roots),
            connect_timeout,
            configs: Mutex::new(HashMap::new()),
        }
    }

    /// TLS client configuration for a credential, cached per credential.
    pub fn client_config(
        &self,
        credential: &Credential,
    ) -> Result<Arc<rustls::ClientConfig>, PushError> {
        let id = credential.id();
        let mut configs = self
            .configs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(config) = configs.get(&id) {
            return Ok(config.clone());
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| PushError::Configuration(format!("TLS setup failed: {e}")))?
            .with_root_certificates(self.roots.clone());

        let mut config = match credential {
            Credential::Token { .. } => builder.with_no_client_auth(),
            Credential::Certificate { pem } => {
                let identity = parse_identity(pem).map_err(|e| match e {
                    PushError::Configuration(detail) => PushError::Authentication { reason: detail },
                    other => other,
                })?;
                builder
                    .with_client_auth_cert(identity.chain, identity.key)
                    .map_err(|e| PushError::Authentication {
                        reason: format!("unusable client certificate: {e}"),
                    })?
            }
        };
        config.alpn_protocols = vec![b"h2".to_vec()];

        let config = Arc::new(config);
        configs.insert(id, config.clone());
        Ok(config)
    }
}

impl Connector for TlsConnector {
    async fn connect(
        &self,
        endpoint: Endpoint,
        credential: &Credential,
    ) -> Result<BoxedIo, PushError> {
        let config = self.client_config(credential)?;
        let server_name = ServerName::try_from(endpoint.host().to_string())
            .map_err(|e| PushError::Configuration(format!("invalid host name: {e}")))?;

        let tcp = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((endpoint.host(), endpoint.port())),
        )
        .await
        .map_err(|_| PushError::Transport(format!("connect to {endpoint} timed out")))?
        .map_err(|e| PushError::Transport(format!("connect to {endpoint} failed: {e}")))?;
        let _ = tcp.set_nodelay(true);

        let tls = tokio_rustls::TlsConnector::from(config)
            .connect(server_name, tcp)
            .await
            .map_err(classify_tls_error)?;

        Ok(Box::new(tls))
    }
}

/// A handshake alert about our certificate means the credential is bad; anything else is transport.
fn classify_tls_error(err: std::io::Error) -> PushError {
    use rustls::AlertDescription as Alert;

    let rejected = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|tls| {
            matches!(
                tls,
                rustls::Error::AlertReceived(
                    Alert::BadCertificate
                        | Alert::UnsupportedCertificate
                        | Alert::CertificateRevoked
                        | Alert::CertificateExpired
                        | Alert::CertificateUnknown
                        | Alert::CertificateRequired
                        | Alert::AccessDenied
                )
            )
        });

    if rejected {
        PushError::Authentication {
            reason: format!("TLS handshake rejected: {err}"),
        }
    } else {
        PushError::Transport(format!("TLS handshake failed: {err}"))
    }
}

/// Cleartext HTTP/2 (h2c) to a fixed address, for local provider stand-ins.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl Connector for TcpConnector {
    async fn connect(
        &self,
        _endpoint: Endpoint,
        _credential: &Credential,
    ) -> Result<BoxedIo, PushError> {
        let tcp = TcpStream::connect(self.addr)
            .await
            .map_err(|e| PushError::Transport(format!("connect to {} failed: {e}", self.addr)))?;
        let _ = tcp.set_nodelay(true);
        Ok(Box::new(tcp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: &str = include_str!("../tests/fixtures/push_identity.pem");

    #[test]
    fn test_certificate_config_offers_h2() {
        let connector = TlsConnector::new(Duration::from_secs(5));
        let credential = Credential::certificate(IDENTITY);
        let config = connector.client_config(&credential).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
        assert!(config.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_config_cached_per_credential() {
        let connector = TlsConnector::new(Duration::from_secs(5));
        let credential = Credential::token("unused", "KEY", "TEAM");
        let first = connector.client_config(&credential).unwrap();
        let second = connector.client_config(&credential).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_bad_bundle_rejected() {
        let connector = TlsConnector::new(Duration::from_secs(5));
        let credential = Credential::certificate("garbage");
        assert!(matches!(
            connector.client_config(&credential),
            Err(PushError::Authentication { .. })
        ));
    }

    #[test]
    fn test_alert_means_authentication() {
        let io = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::AlertReceived(rustls::AlertDescription::BadCertificate),
        );
        assert!(matches!(
            classify_tls_error(io),
            PushError::Authentication { .. }
        ));

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(classify_tls_error(reset), PushError::Transport(_)));
    }
}
