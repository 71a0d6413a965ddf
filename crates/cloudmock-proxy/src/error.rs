//! Error types for the proxy.

use thiserror::Error;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Certificate authority error.
    #[error("CA error: {0}")]
    Ca(#[from] CaError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Certificate authority error type.
#[derive(Debug, Error)]
pub enum CaError {
    /// Failed to parse the root certificate or key.
    #[error("Failed to parse root CA: {0}")]
    Parse(String),

    /// Failed to generate a key or sign a certificate.
    #[error("Failed to issue certificate: {0}")]
    Issue(#[from] rcgen::Error),

    /// The hostname cannot be put in a certificate.
    #[error("Invalid hostname: {0:?}")]
    InvalidHostname(String),

    /// rustls rejected the signing key.
    #[error("Unsupported signing key: {0}")]
    SigningKey(#[source] rustls::Error),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
