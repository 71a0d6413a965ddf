//! Session failure tracking.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::request::ReceivedRequest;

/// Collects unmatched traffic and decides whether the session failed.
///
/// Advisory only: recording never interrupts the exchange being served.
#[derive(Debug)]
pub struct SessionMonitor {
    fail_on_unmatched: bool,
    failed: AtomicBool,
    unmatched: Mutex<Vec<String>>,
}

impl SessionMonitor {
    /// Creates a monitor.
    pub fn new(fail_on_unmatched: bool) -> Self {
        Self {
            fail_on_unmatched,
            failed: AtomicBool::new(false),
            unmatched: Mutex::new(Vec::new()),
        }
    }

    /// Records a request no rule matched.
    pub fn record_unmatched(&self, rr: &ReceivedRequest) {
        let description = rr.inspect();
        if self.fail_on_unmatched {
            tracing::error!(request = %description, seq = rr.seq, "no mock matched request");
            self.failed.store(true, Ordering::SeqCst);
        } else {
            tracing::debug!(request = %description, seq = rr.seq, "no mock matched request");
        }
        self.unmatched.lock().push(description);
    }

    /// Whether the session should be considered failed.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Whether unmatched requests fail the session.
    pub fn fail_on_unmatched(&self) -> bool {
        self.fail_on_unmatched
    }

    /// Descriptions of every unmatched request, in arrival order.
    pub fn unmatched_requests(&self) -> Vec<String> {
        self.unmatched.lock().clone()
    }
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn rr() -> ReceivedRequest {
        let req = Request::builder()
            .uri("http://example.com/missing")
            .body(Vec::new())
            .unwrap();
        ReceivedRequest::classify(&req)
    }

    #[test]
    fn unmatched_fails_session() {
        let monitor = SessionMonitor::default();
        monitor.record_unmatched(&rr());
        assert!(monitor.is_failed());
        assert_eq!(monitor.unmatched_requests(), vec!["GET example.com/missing"]);
    }

    #[test]
    fn tolerant_session_only_records() {
        let monitor = SessionMonitor::new(false);
        monitor.record_unmatched(&rr());
        assert!(!monitor.is_failed());
        assert_eq!(monitor.unmatched_requests().len(), 1);
    }
}
