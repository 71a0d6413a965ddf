//! TLS termination with per-hostname certificate selection.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::ca::CertificateAuthority;

/// Builds TLS acceptors for CONNECT tunnels.
#[derive(Clone)]
pub struct TlsInterceptor {
    ca: Arc<CertificateAuthority>,
    provider: Arc<CryptoProvider>,
}

impl TlsInterceptor {
    /// Creates an interceptor issuing from `ca`.
    pub fn new(ca: Arc<CertificateAuthority>) -> Self {
        Self {
            ca,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    /// The certificate authority.
    pub fn ca(&self) -> &Arc<CertificateAuthority> {
        &self.ca
    }

    /// Acceptor for one tunnel. Certificates follow the client's SNI; clients
    /// that send none (IP destinations) get one for `connect_host`.
    /// Client certificates are never requested.
    pub fn acceptor_for(&self, connect_host: &str) -> Result<TlsAcceptor, rustls::Error> {
        let resolver = Arc::new(CertResolver {
            ca: Arc::clone(&self.ca),
            fallback_host: connect_host.to_string(),
        });

        let mut config = ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_cert_resolver(resolver);
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

impl std::fmt::Debug for TlsInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsInterceptor")
            .field("ca", &self.ca)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct CertResolver {
    ca: Arc<CertificateAuthority>,
    fallback_host: String,
}

impl ResolvesServerCert for CertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let hostname = client_hello
            .server_name()
            .unwrap_or(self.fallback_host.as_str());

        match self.ca.fetch(hostname) {
            Ok(key) => Some(key),
            Err(err) => {
                tracing::warn!(hostname, error = %err, "failed to issue certificate");
                None
            }
        }
    }
}
