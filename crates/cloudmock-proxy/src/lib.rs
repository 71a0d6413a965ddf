//! Cloudmock Proxy - a TLS-intercepting forward proxy that answers cloud API
//! calls from mock rules.
//!
//! Point a client's `HTTP_PROXY`/`HTTPS_PROXY` at [`ProxyHandle::proxy_url`]
//! and trust [`ProxyHandle::root_certificate_pem`]. Nothing is forwarded
//! upstream: every request is answered by [`cloudmock_core::Dispatcher`].
//!
//! ## Architecture
//!
//! ```text
//! Client ─► listener ─┬─ CONNECT host:443 ─► 200 ─► TLS (leaf for SNI/host) ─┐
//!                     │                                                      │
//!                     ├─ GET http://host/... ────────────────────────────────┤
//!                     │                                                      ▼
//!                     └─ GET /path ─► 501                              Dispatcher
//!                                                                          │
//!                                                          first matching MockRule
//! ```
//!
//! ## Certificates
//!
//! Leaf certificates are issued on demand by [`CertificateAuthority`], signed
//! by an embedded root, and cached per hostname for the life of the session.

mod ca;
mod error;
mod handler;
mod proxy;
mod tls;

pub use ca::{CertificateAuthority, RootAuthority};
pub use error::{CaError, ProxyError, Result};
pub use handler::{ProxyHandler, NOT_A_PROXY_MESSAGE};
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer};
pub use tls::TlsInterceptor;
