//! Traffic dumps for debugging mock setups.
//!
//! Independent of `tracing`: when enabled, every classified request and
//! every synthesized response is written as a readable block to a sink.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use http::{HeaderMap, Response};
use parking_lot::Mutex;

use crate::request::ReceivedRequest;

/// Environment variable enabling dumps; any value except `false` turns them on.
pub const DEBUG_ENV_VAR: &str = "CLOUDMOCK_DEBUG";

const UNSET: u8 = 0;
const ON: u8 = 1;
const OFF: u8 = 2;

static GLOBAL_DEBUG: AtomicU8 = AtomicU8::new(UNSET);

/// Sets the process-wide default, overriding the environment.
pub fn set_global_debug(enabled: bool) {
    GLOBAL_DEBUG.store(if enabled { ON } else { OFF }, Ordering::Relaxed);
}

/// Clears the explicit default so the environment is consulted again.
pub fn reset_global_debug() {
    GLOBAL_DEBUG.store(UNSET, Ordering::Relaxed);
}

/// Current process-wide setting.
pub fn global_debug() -> bool {
    match GLOBAL_DEBUG.load(Ordering::Relaxed) {
        ON => true,
        OFF => false,
        _ => std::env::var(DEBUG_ENV_VAR).map_or(false, |v| v != "false"),
    }
}

/// Per-session debug setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    /// Follow [`global_debug`], evaluated at every dump.
    #[default]
    FromEnvironment,
    /// Always dump.
    Enabled,
    /// Never dump.
    Disabled,
}

impl DebugMode {
    /// Whether dumps are currently on.
    pub fn is_enabled(&self) -> bool {
        match self {
            DebugMode::FromEnvironment => global_debug(),
            DebugMode::Enabled => true,
            DebugMode::Disabled => false,
        }
    }
}

impl From<bool> for DebugMode {
    fn from(enabled: bool) -> Self {
        if enabled {
            DebugMode::Enabled
        } else {
            DebugMode::Disabled
        }
    }
}

/// Shared output for dumps. Defaults to stderr.
#[derive(Clone)]
pub struct DebugSink(Arc<Mutex<Box<dyn Write + Send>>>);

impl DebugSink {
    /// Wraps a writer.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(writer))))
    }

    /// Writes to stderr.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    fn write_block(&self, block: &str) {
        let mut writer = self.0.lock();
        if let Err(err) = writer.write_all(block.as_bytes()).and_then(|_| writer.flush()) {
            tracing::debug!(error = %err, "failed to write traffic dump");
        }
    }
}

impl Default for DebugSink {
    fn default() -> Self {
        Self::stderr()
    }
}

impl std::fmt::Debug for DebugSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DebugSink(..)")
    }
}

/// Request/response dumper.
#[derive(Debug, Clone, Default)]
pub struct TrafficDebug {
    mode: DebugMode,
    sink: DebugSink,
}

impl TrafficDebug {
    /// Creates a dumper.
    pub fn new(mode: DebugMode, sink: DebugSink) -> Self {
        Self { mode, sink }
    }

    /// Whether dumps are currently on.
    pub fn enabled(&self) -> bool {
        self.mode.is_enabled()
    }

    /// Dumps a classified request.
    pub fn dump_request(&self, rr: &ReceivedRequest) {
        if !self.enabled() {
            return;
        }

        let mut out = String::new();
        let _ = writeln!(out, "--- CLOUDMOCK RECEIVED REQUEST #{} ---", rr.seq);
        let _ = writeln!(
            out,
            "Operation: {}:{}",
            rr.service.as_deref().unwrap_or("?"),
            rr.action.as_deref().unwrap_or("?")
        );
        if let Some(region) = &rr.region {
            let _ = writeln!(out, "Region: {}", region);
        }
        let _ = writeln!(out, "{} {}", rr.method, rr.uri);
        let _ = writeln!(out, "Host: {}", rr.hostname);
        write_headers(&mut out, &rr.headers);
        if !rr.params.is_empty() {
            let _ = writeln!(out, "Params: {:?}", rr.params);
        }
        if !rr.raw_body.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", String::from_utf8_lossy(&rr.raw_body));
        }
        let _ = writeln!(out, "--------------------------------------");
        self.sink.write_block(&out);
    }

    /// Dumps a synthesized response.
    pub fn dump_response(&self, seq: u64, resp: &Response<Vec<u8>>) {
        if !self.enabled() {
            return;
        }

        let mut out = String::new();
        let _ = writeln!(out, "--- CLOUDMOCK RESPONSE #{} ---", seq);
        let _ = writeln!(out, "{:?} {}", resp.version(), resp.status());
        write_headers(&mut out, resp.headers());
        if !resp.body().is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", String::from_utf8_lossy(resp.body()));
        }
        let _ = writeln!(out, "------------------------------");
        self.sink.write_block(&out);
    }
}

fn write_headers(out: &mut String, headers: &HeaderMap) {
    for (name, value) in headers {
        let _ = writeln!(out, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
    }
}
