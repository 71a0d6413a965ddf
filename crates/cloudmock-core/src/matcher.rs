//! Request matchers.
//!
//! A [`MockRequest`] is a set of optional conditions over a
//! [`ReceivedRequest`]. Every declared condition must hold; undeclared ones
//! are ignored. Conditions are evaluated in a fixed order and the first
//! failure short-circuits:
//!
//! 1. hostname, service, action, path, method (exact)
//! 2. metadata-service host
//! 3. path regex, raw body
//! 4. declared parameters (per key)
//! 5. JSON payload expectations
//! 6. the custom predicate
//! 7. strict parameter equality
//!
//! The match budget lives on [`crate::rule::MockRule`], which owns the counter.

use std::fmt;
use std::sync::Arc;

use http::Method;
use regex::Regex;
use serde_json::Value;

use crate::jmes::PathExpr;
use crate::request::{Params, ReceivedRequest};

/// IPv4 address of the instance metadata service.
pub const IMDS_IPV4: &str = "169.254.169.254";
/// IPv6 address of the instance metadata service.
pub const IMDS_IPV6: &str = "fd00:ec2::254";

/// Caller-supplied request predicate.
pub type RequestPredicate = Arc<dyn Fn(&ReceivedRequest) -> bool + Send + Sync>;

/// Caller-supplied check over an evaluated payload path (`None` when absent).
pub type ValuePredicate = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

/// What a payload path must evaluate to.
#[derive(Clone)]
pub enum PayloadExpectation {
    /// Equality with a scalar. Numbers compare as `f64`; `Null` also matches
    /// a missing path.
    Value(Value),
    /// Arbitrary check.
    Predicate(ValuePredicate),
}

impl PayloadExpectation {
    /// Wraps a closure as a predicate expectation.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        PayloadExpectation::Predicate(Arc::new(f))
    }

    fn check(&self, found: Option<&Value>) -> bool {
        match self {
            PayloadExpectation::Value(expected) => values_equal(expected, found),
            PayloadExpectation::Predicate(f) => f(found),
        }
    }
}

impl fmt::Debug for PayloadExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadExpectation::Value(v) => f.debug_tuple("Value").field(v).finish(),
            PayloadExpectation::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<Value> for PayloadExpectation {
    fn from(value: Value) -> Self {
        PayloadExpectation::Value(value)
    }
}

impl From<&str> for PayloadExpectation {
    fn from(value: &str) -> Self {
        PayloadExpectation::Value(Value::from(value))
    }
}

impl From<String> for PayloadExpectation {
    fn from(value: String) -> Self {
        PayloadExpectation::Value(Value::from(value))
    }
}

impl From<bool> for PayloadExpectation {
    fn from(value: bool) -> Self {
        PayloadExpectation::Value(Value::from(value))
    }
}

impl From<i64> for PayloadExpectation {
    fn from(value: i64) -> Self {
        PayloadExpectation::Value(Value::from(value))
    }
}

impl From<f64> for PayloadExpectation {
    fn from(value: f64) -> Self {
        PayloadExpectation::Value(Value::from(value))
    }
}

/// Declarative request conditions.
#[derive(Clone, Default)]
pub struct MockRequest {
    /// Require the request parameters to equal `params` exactly.
    pub strict: bool,
    /// Exact destination hostname.
    pub hostname: Option<String>,
    /// Exact service name.
    pub service: Option<String>,
    /// Exact operation name.
    pub action: Option<String>,
    /// Exact path.
    pub path: Option<String>,
    /// Path regular expression.
    pub path_regex: Option<Regex>,
    /// Exact HTTP method.
    pub method: Option<Method>,
    /// Destination must be the instance metadata service.
    pub is_ec2_imds: bool,
    /// Exact raw body.
    pub body: Option<String>,
    /// Expected parameters.
    pub params: Option<Params>,
    /// `(path expression, expectation)` pairs over the JSON payload.
    pub payload: Vec<(String, PayloadExpectation)>,
    /// Final custom check.
    pub predicate: Option<RequestPredicate>,
    /// Maximum number of times the owning rule may match.
    pub max_match_count: Option<u64>,
}

impl MockRequest {
    /// Creates a matcher that accepts every request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches `service:action`.
    pub fn for_action(service: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new().with_service(service).with_action(action)
    }

    /// Requires exact parameter equality.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Sets the hostname.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Sets the service.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the action.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Sets the exact path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the path regex.
    pub fn with_path_regex(mut self, regex: Regex) -> Self {
        self.path_regex = Some(regex);
        self
    }

    /// Sets the HTTP method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Restricts to the instance metadata service.
    pub fn imds(mut self) -> Self {
        self.is_ec2_imds = true;
        self
    }

    /// Sets the exact raw body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Adds one expected parameter value.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(Params::new)
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Adds a payload expectation.
    pub fn with_payload(mut self, path: impl Into<String>, expected: impl Into<PayloadExpectation>) -> Self {
        self.payload.push((path.into(), expected.into()));
        self
    }

    /// Sets the custom predicate.
    pub fn with_predicate<F>(mut self, f: F) -> Self
    where
        F: Fn(&ReceivedRequest) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(f));
        self
    }

    /// Caps how many times the owning rule may match.
    pub fn with_max_match_count(mut self, max: u64) -> Self {
        self.max_match_count = Some(max);
        self
    }

    /// Evaluates every declared condition except the match budget.
    pub fn matches(&self, rr: &ReceivedRequest) -> bool {
        if !opt_eq(&self.hostname, &rr.hostname) {
            return false;
        }
        if let Some(service) = &self.service {
            if rr.service.as_deref() != Some(service.as_str()) {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if rr.action.as_deref() != Some(action.as_str()) {
                return false;
            }
        }
        if !opt_eq(&self.path, &rr.path) {
            return false;
        }
        if let Some(method) = &self.method {
            if *method != rr.method {
                return false;
            }
        }

        if self.is_ec2_imds && rr.hostname != IMDS_IPV4 && rr.hostname != IMDS_IPV6 {
            return false;
        }

        if let Some(regex) = &self.path_regex {
            if !regex.is_match(&rr.path) {
                return false;
            }
        }

        if let Some(body) = &self.body {
            if body.as_bytes() != rr.raw_body.as_slice() {
                return false;
            }
        }

        if !self.strict && !self.params_subset_match(&rr.params) {
            return false;
        }

        if !self.payload.is_empty() && !self.payload_match(rr) {
            return false;
        }

        if let Some(predicate) = &self.predicate {
            if !predicate(rr) {
                return false;
            }
        }

        if self.strict {
            let empty = Params::new();
            let expected = self.params.as_ref().unwrap_or(&empty);
            return *expected == rr.params;
        }

        true
    }

    fn params_subset_match(&self, actual: &Params) -> bool {
        let Some(expected) = &self.params else {
            return true;
        };
        expected
            .iter()
            .all(|(key, values)| actual.get(key) == Some(values))
    }

    fn payload_match(&self, rr: &ReceivedRequest) -> bool {
        let Some(document) = &rr.json_payload else {
            return false;
        };

        self.payload.iter().all(|(path, expected)| {
            match PathExpr::compile(path).and_then(|expr| expr.search(document)) {
                Ok(found) => expected.check(found.as_ref()),
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "invalid payload path expression");
                    false
                }
            }
        })
    }

    /// One-line description of the declared conditions.
    pub fn inspect(&self) -> String {
        let mut parts = Vec::new();
        if self.strict {
            parts.push("STRICT".to_string());
        }
        if let Some(service) = &self.service {
            parts.push(format!("Service={}", service));
        }
        if let Some(action) = &self.action {
            parts.push(format!("Action={}", action));
        }
        if self.is_ec2_imds {
            parts.push("imds=true".to_string());
        }
        if let Some(hostname) = &self.hostname {
            parts.push(format!("Hostname={}", hostname));
        }
        if let Some(path) = &self.path {
            parts.push(format!("Path={}", path));
        }
        if let Some(regex) = &self.path_regex {
            parts.push(format!("PathRegex={}", regex.as_str()));
        }
        if let Some(method) = &self.method {
            parts.push(format!("Method={}", method));
        }
        if let Some(params) = &self.params {
            parts.push(format!("Params={:?}", params));
        }
        if let Some(body) = &self.body {
            parts.push(format!("Body={}", body));
        }
        if parts.is_empty() {
            return "(any request)".to_string();
        }
        parts.join(" ")
    }
}

impl fmt::Debug for MockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRequest")
            .field("conditions", &self.inspect())
            .field("payload", &self.payload)
            .field("predicate", &self.predicate.as_ref().map(|_| ".."))
            .field("max_match_count", &self.max_match_count)
            .finish()
    }
}

fn opt_eq(expected: &Option<String>, actual: &str) -> bool {
    expected.as_deref().map_or(true, |e| e == actual)
}

fn values_equal(expected: &Value, found: Option<&Value>) -> bool {
    match (expected, found) {
        (Value::Null, None) | (Value::Null, Some(Value::Null)) => true,
        (_, None) => false,
        (Value::Number(a), Some(Value::Number(b))) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        (expected, Some(found)) => expected == found,
    }
}
