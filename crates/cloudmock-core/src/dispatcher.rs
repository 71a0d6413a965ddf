//! Request dispatch: classify, match in order, render.

use std::sync::Arc;

use http::{Request, Response};

use crate::debug::TrafficDebug;
use crate::error_response::ErrorResponse;
use crate::request::ReceivedRequest;
use crate::rule::MockRule;
use crate::session::SessionMonitor;

/// Routes intercepted requests to the first matching rule.
///
/// Rules are tried in declaration order; the first one whose conditions hold
/// and whose budget allows it answers. Unmatched requests get a 501
/// `AccessDenied` body and are reported to the [`SessionMonitor`].
#[derive(Debug)]
pub struct Dispatcher {
    rules: Vec<MockRule>,
    monitor: Arc<SessionMonitor>,
    debug: TrafficDebug,
}

impl Dispatcher {
    /// Creates a dispatcher that fails the session on unmatched requests.
    pub fn new(rules: Vec<MockRule>) -> Self {
        Self {
            rules,
            monitor: Arc::new(SessionMonitor::default()),
            debug: TrafficDebug::default(),
        }
    }

    /// Uses a shared session monitor.
    pub fn with_monitor(mut self, monitor: Arc<SessionMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Sets the traffic dumper.
    pub fn with_debug(mut self, debug: TrafficDebug) -> Self {
        self.debug = debug;
        self
    }

    /// Rules in priority order.
    pub fn rules(&self) -> &[MockRule] {
        &self.rules
    }

    /// The session monitor.
    pub fn monitor(&self) -> &Arc<SessionMonitor> {
        &self.monitor
    }

    /// Answers one request. Never fails: every outcome is an HTTP response.
    pub fn handle(&self, req: &Request<Vec<u8>>) -> Response<Vec<u8>> {
        let rr = ReceivedRequest::classify(req);
        self.debug.dump_request(&rr);

        let resp = match self.rules.iter().position(|rule| rule.try_claim(&rr)) {
            Some(index) => {
                tracing::debug!(seq = rr.seq, request = %rr.inspect(), rule = index, "mock matched");
                self.rules[index].respond(&rr)
            }
            None => {
                self.monitor.record_unmatched(&rr);
                ErrorResponse::unmatched()
                    .render(rr.assumed_response)
                    .into_http_response()
            }
        };

        self.debug.dump_response(rr.seq, &resp);
        resp
    }
}
