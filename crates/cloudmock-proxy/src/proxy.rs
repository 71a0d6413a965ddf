//! Mock proxy server.
//!
//! A [`ProxyServer`] owns the rule list for one test session. Starting it
//! binds a listener and returns a [`ProxyHandle`]; stopping the handle closes
//! the listener and drops every certificate and counter the session
//! accumulated.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cloudmock_core::{DebugMode, DebugSink, Dispatcher, MockRule, SessionMonitor, TrafficDebug};

use crate::ca::CertificateAuthority;
use crate::error::Result;
use crate::handler::ProxyHandler;
use crate::tls::TlsInterceptor;

/// Proxy server configuration.
#[derive(Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// Certificate authority for intercepted TLS. A fresh one per server
    /// when unset.
    pub authority: Option<Arc<CertificateAuthority>>,
    /// Traffic dump mode.
    pub debug: DebugMode,
    /// Where traffic dumps are written.
    pub debug_sink: DebugSink,
    /// Whether an unmatched request fails the session.
    pub fail_on_unmatched: bool,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("addr", &self.addr)
            .field("authority", &self.authority.is_some())
            .field("debug", &self.debug)
            .field("fail_on_unmatched", &self.fail_on_unmatched)
            .finish()
    }
}

impl ProxyConfig {
    /// Creates a configuration listening on an ephemeral loopback port.
    pub fn new() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            authority: None,
            debug: DebugMode::default(),
            debug_sink: DebugSink::default(),
            fail_on_unmatched: true,
        }
    }

    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port (uses 127.0.0.1 as host).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::from(([127, 0, 0, 1], port));
        self
    }

    /// Shares a certificate authority across servers.
    pub fn with_authority(mut self, authority: Arc<CertificateAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Sets the traffic dump mode.
    pub fn with_debug(mut self, debug: impl Into<DebugMode>) -> Self {
        self.debug = debug.into();
        self
    }

    /// Sets the traffic dump destination.
    pub fn with_debug_sink(mut self, sink: DebugSink) -> Self {
        self.debug_sink = sink;
        self
    }

    /// Sets whether unmatched requests fail the session.
    pub fn fail_on_unmatched(mut self, fail: bool) -> Self {
        self.fail_on_unmatched = fail;
        self
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Mock proxy for one test session.
pub struct ProxyServer {
    config: ProxyConfig,
    rules: Vec<MockRule>,
}

impl ProxyServer {
    /// Creates a server answering with `rules`, first match wins.
    pub fn new(config: ProxyConfig, rules: Vec<MockRule>) -> Self {
        Self { config, rules }
    }

    /// Creates a server with default configuration.
    pub fn with_rules(rules: Vec<MockRule>) -> Self {
        Self::new(ProxyConfig::new(), rules)
    }

    /// Returns the address the proxy is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Binds the listener and starts accepting connections.
    pub async fn start(self) -> Result<ProxyHandle> {
        let authority = match self.config.authority {
            Some(authority) => authority,
            None => Arc::new(CertificateAuthority::new()?),
        };

        let monitor = Arc::new(SessionMonitor::new(self.config.fail_on_unmatched));
        let debug = TrafficDebug::new(self.config.debug, self.config.debug_sink);
        let dispatcher = Dispatcher::new(self.rules)
            .with_monitor(Arc::clone(&monitor))
            .with_debug(debug);

        let listener = TcpListener::bind(self.config.addr).await?;
        let addr = listener.local_addr()?;
        info!(%addr, rules = dispatcher.rules().len(), "cloudmock proxy listening");

        let handler = ProxyHandler::new(
            Arc::new(dispatcher),
            TlsInterceptor::new(Arc::clone(&authority)),
        );

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accepted connection");
                            tokio::spawn(handler.clone().serve(stream, peer));
                        }
                        Err(err) => warn!(error = %err, "accept failed"),
                    },
                    _ = shutdown_rx.recv() => {
                        info!(%addr, "cloudmock proxy shutting down");
                        break;
                    }
                }
            }
        });

        Ok(ProxyHandle {
            addr,
            authority,
            monitor,
            shutdown_tx,
            task: Some(task),
        })
    }
}

/// A running proxy session.
#[derive(Debug)]
pub struct ProxyHandle {
    addr: SocketAddr,
    authority: Arc<CertificateAuthority>,
    monitor: Arc<SessionMonitor>,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl ProxyHandle {
    /// The bound listener address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Value for `HTTP_PROXY` / `HTTPS_PROXY`.
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// PEM of the root that signs every intercepted certificate.
    pub fn root_certificate_pem(&self) -> &str {
        self.authority.root().cert_pem()
    }

    /// The session's certificate authority.
    pub fn authority(&self) -> &Arc<CertificateAuthority> {
        &self.authority
    }

    /// True once an unmatched request has failed the session.
    pub fn is_failed(&self) -> bool {
        self.monitor.is_failed()
    }

    /// Descriptions of requests no rule answered.
    pub fn unmatched_requests(&self) -> Vec<String> {
        self.monitor.unmatched_requests()
    }

    /// Signals the accept loop to exit without waiting for it.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Closes the listener and waits for the accept loop to exit.
    /// Connections already being served finish on their own.
    pub async fn stop(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "accept loop panicked");
            }
        }
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.shutdown();
        }
    }
}
