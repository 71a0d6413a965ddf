//! Request classification.
//!
//! Turns an intercepted HTTP request into a [`ReceivedRequest`]: hostname,
//! path, the inferred cloud service / operation / region, decoded form
//! parameters, the raw body, an optional parsed JSON payload, and the wire
//! format the caller most likely expects back.
//!
//! ## Inference rules
//!
//! - Service and region come from the `Credential=<key>/<date>/<region>/<service>/...`
//!   fragment of the `Authorization` header.
//! - The operation comes from `X-Amz-Target: <ServiceVersion>.<Operation>`, or,
//!   failing that, from the `Action` field of a form-encoded body.
//! - JSON-ish content types answer with JSON; form posts that resolved both a
//!   service and an action answer with XML (the query protocol).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use http::{HeaderMap, Method, Request, Uri};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// XML content type used for query-protocol responses.
pub const CONTENT_TYPE_XML: &str = "text/xml";
/// JSON content type used for JSON-protocol responses.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Plain text content type, the fallback for everything else.
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// Form content type that marks a query-protocol request.
const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Header carrying `<ServiceVersion>.<Operation>` for JSON-RPC style APIs.
pub const TARGET_HEADER: &str = "x-amz-target";

static CREDENTIAL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Credential=(\S+)\b").expect("credential regex is valid"));

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Decoded form parameters: key -> ordered values, keys sorted.
pub type Params = BTreeMap<String, Vec<String>>;

/// Wire format a response to this request is expected to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResponseFormat {
    /// Plain text (nothing could be inferred).
    #[default]
    Text,
    /// JSON-RPC style protocol.
    Json,
    /// Form-encoded request, XML-enveloped response (query protocol).
    Xml,
}

impl ResponseFormat {
    /// Returns the content type used when answering in this format.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseFormat::Text => CONTENT_TYPE_TEXT,
            ResponseFormat::Json => CONTENT_TYPE_JSON,
            ResponseFormat::Xml => CONTENT_TYPE_XML,
        }
    }
}

/// A classified intercepted request.
#[derive(Debug, Clone, Default)]
pub struct ReceivedRequest {
    /// Sequence number, unique for the process lifetime.
    pub seq: u64,
    /// HTTP method.
    pub method: Method,
    /// Absolute request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Destination host, without port or IPv6 brackets.
    pub hostname: String,
    /// Request path, without the query string.
    pub path: String,
    /// Inferred operation name, e.g. `DescribeServices`.
    pub action: Option<String>,
    /// Inferred service name, e.g. `ecs`.
    pub service: Option<String>,
    /// Inferred region, e.g. `us-east-1`.
    pub region: Option<String>,
    /// Query-string and form-body parameters combined.
    pub params: Params,
    /// Parameters decoded from a form-encoded body only.
    pub post_params: Params,
    /// Raw body bytes, always preserved.
    pub raw_body: Vec<u8>,
    /// Parsed JSON payload, when the body was JSON and parsed cleanly.
    pub json_payload: Option<Value>,
    /// Expected response wire format.
    pub assumed_response: ResponseFormat,
}

impl ReceivedRequest {
    /// Classifies a raw HTTP request whose URI is absolute.
    pub fn classify(req: &Request<Vec<u8>>) -> Self {
        let uri = req.uri().clone();
        let headers = req.headers().clone();
        let body = req.body().clone();

        let hostname = extract_hostname(&uri, &headers);
        let path = uri.path().to_string();

        let content_type = header_str(&headers, CONTENT_TYPE.as_str()).unwrap_or_default();
        let is_form = media_type(content_type).eq_ignore_ascii_case(CONTENT_TYPE_FORM);
        let is_json = content_type.contains("json");

        let mut post_params = Params::new();
        if is_form && matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH) {
            append_params(&mut post_params, &body);
        }

        // body values first, then the query string
        let mut params = post_params.clone();
        if let Some(query) = uri.query() {
            append_params(&mut params, query.as_bytes());
        }

        let mut rr = Self {
            seq: REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed) + 1,
            method: req.method().clone(),
            uri,
            headers,
            hostname,
            path,
            params,
            post_params,
            raw_body: body,
            ..Default::default()
        };

        if is_json {
            rr.assumed_response = ResponseFormat::Json;
            if !rr.raw_body.is_empty() {
                rr.json_payload = serde_json::from_slice(&rr.raw_body).ok();
            }
        }

        if let Some((region, service)) =
            header_str(&rr.headers, AUTHORIZATION.as_str()).and_then(parse_credential_scope)
        {
            rr.region = Some(region);
            rr.service = Some(service);
        }

        if let Some(target) = header_str(&rr.headers, TARGET_HEADER) {
            if let Some((_, operation)) = target.split_once('.') {
                rr.action = Some(operation.to_string());
            }
        }

        // only a form-supplied Action marks the query protocol
        if rr.action.is_none() {
            rr.action = rr
                .post_params
                .get("Action")
                .and_then(|values| values.first())
                .cloned();

            if rr.assumed_response == ResponseFormat::Text
                && rr.action.is_some()
                && rr.service.is_some()
                && is_form
            {
                rr.assumed_response = ResponseFormat::Xml;
            }
        }

        tracing::debug!(seq = rr.seq, request = %rr.inspect(), "classified request");

        rr
    }

    /// Short description: `service:action` when known, else `METHOD host/path`.
    pub fn inspect(&self) -> String {
        match (&self.service, &self.action) {
            (Some(service), Some(action)) => format!("{}:{}", service, action),
            _ => format!("{} {}{}", self.method, self.hostname, self.path),
        }
    }

    /// Returns the first value of a header as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    /// Returns the first value of a decoded parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

impl fmt::Display for ReceivedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inspect())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Content type without parameters, e.g. `text/xml; charset=utf-8` -> `text/xml`.
fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

fn extract_hostname(uri: &Uri, headers: &HeaderMap) -> String {
    let host = match uri.host() {
        Some(host) => host.to_string(),
        None => header_str(headers, HOST.as_str())
            .map(strip_port)
            .unwrap_or_default()
            .to_string(),
    };

    host.trim_start_matches('[').trim_end_matches(']').to_string()
}

/// Strips a `:port` suffix from a Host header value, keeping IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.parse::<u16>().is_ok() => name,
        _ => host,
    }
}

fn append_params(params: &mut Params, input: &[u8]) {
    for (key, value) in url::form_urlencoded::parse(input) {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
}

/// Extracts `(region, service)` from a SigV4 `Authorization` header.
fn parse_credential_scope(auth: &str) -> Option<(String, String)> {
    let captures = CREDENTIAL_REGEX.captures(auth)?;
    // key/date/region/service/aws4_request
    let mut parts = captures.get(1)?.as_str().split('/');
    let region = parts.nth(2)?;
    let service = parts.next()?;
    Some((region.to_string(), service.to_string()))
}
