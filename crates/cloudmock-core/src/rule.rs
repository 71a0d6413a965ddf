//! Mock rules: a matcher, a response and a match counter.

use std::sync::atomic::{AtomicU64, Ordering};

use http::Response;

use crate::matcher::MockRequest;
use crate::request::ReceivedRequest;
use crate::response::{MockBody, MockResponse};

/// One `(matcher, response)` pair.
#[derive(Debug)]
pub struct MockRule {
    /// Conditions.
    pub request: MockRequest,
    /// Answer.
    pub response: MockResponse,
    match_count: AtomicU64,
}

impl MockRule {
    /// Creates a rule.
    pub fn new(request: MockRequest, response: MockResponse) -> Self {
        Self {
            request,
            response,
            match_count: AtomicU64::new(0),
        }
    }

    /// Answers `service:action` with a body.
    pub fn simple(service: impl Into<String>, action: impl Into<String>, body: impl Into<MockBody>) -> Self {
        Self::new(MockRequest::for_action(service, action), MockResponse::new(body))
    }

    /// Answers `service:action` with an `AccessDenied` error.
    pub fn failure(service: impl Into<String>, action: impl Into<String>) -> Self {
        Self::failure_with_code(None, service, action, "AccessDenied", "This mock was requested to fail")
    }

    /// Answers `service:action` with a custom error; status defaults to 400.
    pub fn failure_with_code(
        status: Option<u16>,
        service: impl Into<String>,
        action: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            MockRequest::for_action(service, action),
            MockResponse::error(status, code, message),
        )
    }

    /// Times this rule has matched.
    pub fn match_count(&self) -> u64 {
        self.match_count.load(Ordering::Acquire)
    }

    /// Whether the match budget is used up.
    pub fn is_exhausted(&self) -> bool {
        self.request
            .max_match_count
            .is_some_and(|max| self.match_count() >= max)
    }

    /// Matches the request and, on success, consumes one unit of budget.
    ///
    /// The increment is a compare-and-swap against the cap, so concurrent
    /// callers never push the count past `max_match_count`.
    pub fn try_claim(&self, rr: &ReceivedRequest) -> bool {
        if self.is_exhausted() || !self.request.matches(rr) {
            return false;
        }

        match self.request.max_match_count {
            Some(max) => self
                .match_count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
                .is_ok(),
            None => {
                self.match_count.fetch_add(1, Ordering::AcqRel);
                true
            }
        }
    }

    /// Renders this rule's response.
    pub fn respond(&self, rr: &ReceivedRequest) -> Response<Vec<u8>> {
        self.response
            .render(rr, self.request.action.as_deref())
            .into_http_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use http::Request;

    fn sts_request(action: &str) -> ReceivedRequest {
        let req = Request::builder()
            .method("POST")
            .uri("https://sts.amazonaws.com/")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Authorization", "AWS4-HMAC-SHA256 Credential=k/20221030/us-east-1/sts/aws4_request")
            .body(format!("Action={}", action).into_bytes())
            .unwrap();
        ReceivedRequest::classify(&req)
    }

    #[test]
    fn max_match_count_two() {
        let rule = MockRule::new(
            MockRequest::for_action("sts", "GetCallerIdentity").with_max_match_count(2),
            MockResponse::new("ok"),
        );
        let rr = sts_request("GetCallerIdentity");

        assert!(rule.try_claim(&rr));
        assert!(rule.try_claim(&rr));
        assert!(!rule.try_claim(&rr));
        assert_eq!(rule.match_count(), 2);
        assert!(rule.is_exhausted());
    }

    #[test]
    fn failed_match_does_not_count() {
        let rule = MockRule::simple("sts", "GetCallerIdentity", "ok");
        assert!(!rule.try_claim(&sts_request("AssumeRole")));
        assert_eq!(rule.match_count(), 0);
        assert!(rule.try_claim(&sts_request("GetCallerIdentity")));
        assert_eq!(rule.match_count(), 1);
    }

    #[test]
    fn budget_holds_under_contention() {
        let rule = Arc::new(MockRule::new(
            MockRequest::new().with_max_match_count(5),
            MockResponse::new("ok"),
        ));
        let rr = Arc::new(sts_request("Anything"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rule = Arc::clone(&rule);
                let rr = Arc::clone(&rr);
                thread::spawn(move || (0..10).filter(|_| rule.try_claim(&rr)).count())
            })
            .collect();

        let claimed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(claimed, 5);
        assert_eq!(rule.match_count(), 5);
    }

    #[test]
    fn failure_rule_renders_error() {
        let rule = MockRule::failure("sts", "GetCallerIdentity");
        let rr = sts_request("GetCallerIdentity");
        assert!(rule.try_claim(&rr));

        let resp = rule.respond(&rr);
        assert_eq!(resp.status(), 400);
        let body = String::from_utf8(resp.into_body()).unwrap();
        assert!(body.contains("<Code>AccessDenied</Code>"));
        assert!(body.contains("This mock was requested to fail"));
    }

    #[test]
    fn failure_with_code_status() {
        let rule = MockRule::failure_with_code(Some(503), "sts", "GetCallerIdentity", "Unavailable", "down");
        let resp = rule.respond(&sts_request("GetCallerIdentity"));
        assert_eq!(resp.status(), 503);
    }
}
