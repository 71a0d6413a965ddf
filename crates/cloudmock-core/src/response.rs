//! Response synthesis.
//!
//! A [`MockResponse`] declares what to answer; [`MockResponse::render`]
//! turns it into wire bytes for one [`ReceivedRequest`]. Structured bodies
//! follow the protocol the request was classified as: JSON is written as-is,
//! query-protocol XML is enveloped as
//!
//! ```text
//! <ActionResponse>
//!   <ActionResult>...</ActionResult>
//!   <ResponseMetadata><RequestId>...</RequestId></ResponseMetadata>
//! </ActionResponse>
//! ```
//!
//! The action is only known per request, so the envelope is rendered with a
//! placeholder tag that is substituted afterwards.
//!
//! Rendering never fails outward: unserializable bodies and bad callable
//! results become `BadMockBody` / `InvalidBodyFunc` error responses.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, DATE, SERVER};
use http::{Response, StatusCode};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RenderError;
use crate::error_response::ErrorResponse;
use crate::request::{ReceivedRequest, ResponseFormat, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, CONTENT_TYPE_XML};
use crate::sniff::{infer_content_type, sniff_content_type};
use crate::xml::{self, XmlWriter};

/// Value of the `Server` header on every synthesized response.
pub const SERVER_NAME: &str = "cloudmock";

/// Request-id header added when the response does not set one.
pub const REQUEST_ID_HEADER: &str = "x-amzn-requestid";

/// Request id used when no random source is available.
pub const FALLBACK_REQUEST_ID: &str = "1b206dd1-f9a8-11e5-becf-051c60f11c4a";

/// Request id inside the XML `ResponseMetadata` envelope.
pub const WRAPPED_REQUEST_ID: &str = "01234567-89ab-cdef-0123-456789abcdef";

const ACTION_PLACEHOLDER: &str = "_ACTION_NAME_HERE_";

/// Full-response override.
pub type HandlerFn = Arc<dyn Fn(&ReceivedRequest) -> Response<Vec<u8>> + Send + Sync>;

/// Forces how structured bodies are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseEncoding {
    /// Follow the request's assumed response format.
    #[default]
    Default,
    /// Always JSON.
    Json,
    /// Always query-protocol XML.
    Xml,
    /// JSON text served as `text/plain`.
    Text,
}

/// A computed body. Only these return shapes are accepted.
#[derive(Clone)]
pub enum BodyFn {
    /// `body` with the declared status and an inferred content type.
    Body(Arc<dyn Fn(&ReceivedRequest) -> String + Send + Sync>),
    /// `(body, status)`.
    BodyStatus(Arc<dyn Fn(&ReceivedRequest) -> (String, u16) + Send + Sync>),
    /// `(body, status, content type)`.
    BodyStatusContentType(Arc<dyn Fn(&ReceivedRequest) -> (String, u16, String) + Send + Sync>),
    /// A dynamically shaped result, checked at render time: one to three
    /// values of `[string, integer status, string content type]`.
    Values(Arc<dyn Fn(&ReceivedRequest) -> Vec<Value> + Send + Sync>),
}

impl BodyFn {
    /// Wraps a body-only closure.
    pub fn body<F>(f: F) -> Self
    where
        F: Fn(&ReceivedRequest) -> String + Send + Sync + 'static,
    {
        BodyFn::Body(Arc::new(f))
    }

    /// Wraps a `(body, status)` closure.
    pub fn with_status<F>(f: F) -> Self
    where
        F: Fn(&ReceivedRequest) -> (String, u16) + Send + Sync + 'static,
    {
        BodyFn::BodyStatus(Arc::new(f))
    }

    /// Wraps a `(body, status, content type)` closure.
    pub fn with_content_type<F>(f: F) -> Self
    where
        F: Fn(&ReceivedRequest) -> (String, u16, String) + Send + Sync + 'static,
    {
        BodyFn::BodyStatusContentType(Arc::new(f))
    }

    /// Wraps a closure returning loosely typed values.
    pub fn values<F>(f: F) -> Self
    where
        F: Fn(&ReceivedRequest) -> Vec<Value> + Send + Sync + 'static,
    {
        BodyFn::Values(Arc::new(f))
    }

    fn call(&self, rr: &ReceivedRequest) -> Result<(String, Option<u16>, Option<String>), RenderError> {
        match self {
            BodyFn::Body(f) => Ok((f(rr), None, None)),
            BodyFn::BodyStatus(f) => {
                let (body, status) = f(rr);
                Ok((body, Some(status), None))
            }
            BodyFn::BodyStatusContentType(f) => {
                let (body, status, content_type) = f(rr);
                Ok((body, Some(status), Some(content_type)))
            }
            BodyFn::Values(f) => unpack_values(f(rr)),
        }
    }
}

impl fmt::Debug for BodyFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            BodyFn::Body(_) => "Body",
            BodyFn::BodyStatus(_) => "BodyStatus",
            BodyFn::BodyStatusContentType(_) => "BodyStatusContentType",
            BodyFn::Values(_) => "Values",
        };
        write!(f, "BodyFn::{}(..)", shape)
    }
}

fn unpack_values(values: Vec<Value>) -> Result<(String, Option<u16>, Option<String>), RenderError> {
    if values.is_empty() || values.len() > 3 {
        return Err(RenderError::InvalidBodyFunc(format!(
            "expected 1 to 3 return values, got {}",
            values.len()
        )));
    }

    let mut iter = values.into_iter();
    let body = match iter.next() {
        Some(Value::String(s)) => s,
        other => {
            return Err(RenderError::InvalidBodyFunc(format!(
                "body must be a string, got {:?}",
                other
            )))
        }
    };
    let status = match iter.next() {
        None => None,
        Some(value) => Some(
            value
                .as_u64()
                .and_then(|s| u16::try_from(s).ok())
                .filter(|s| (100..1000).contains(s))
                .ok_or_else(|| RenderError::InvalidBodyFunc(format!("invalid status code {}", value)))?,
        ),
    };
    let content_type = match iter.next() {
        None => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            return Err(RenderError::InvalidBodyFunc(format!(
                "content type must be a string, got {}",
                other
            )))
        }
    };
    Ok((body, status, content_type))
}

/// What a mock answers with.
#[derive(Clone, Default)]
pub enum MockBody {
    /// No body.
    #[default]
    Empty,
    /// Literal text; content type inferred from the first character.
    Text(String),
    /// Literal bytes; content type sniffed.
    Bytes(Vec<u8>),
    /// Structured value encoded as JSON or XML.
    Structured(Value),
    /// Computed per request.
    Callable(BodyFn),
    /// Produces the complete response, bypassing everything else.
    Handler(HandlerFn),
}

impl MockBody {
    /// Serializes any value into a structured body.
    pub fn serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(MockBody::Structured(serde_json::to_value(value)?))
    }

    /// Wraps a full-response handler.
    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(&ReceivedRequest) -> Response<Vec<u8>> + Send + Sync + 'static,
    {
        MockBody::Handler(Arc::new(f))
    }
}

impl fmt::Debug for MockBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockBody::Empty => f.write_str("Empty"),
            MockBody::Text(s) => f.debug_tuple("Text").field(s).finish(),
            MockBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            MockBody::Structured(v) => f.debug_tuple("Structured").field(v).finish(),
            MockBody::Callable(c) => c.fmt(f),
            MockBody::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

impl From<&str> for MockBody {
    fn from(value: &str) -> Self {
        MockBody::Text(value.to_string())
    }
}

impl From<String> for MockBody {
    fn from(value: String) -> Self {
        MockBody::Text(value)
    }
}

impl From<Vec<u8>> for MockBody {
    fn from(value: Vec<u8>) -> Self {
        MockBody::Bytes(value)
    }
}

impl From<Value> for MockBody {
    fn from(value: Value) -> Self {
        MockBody::Structured(value)
    }
}

impl From<BodyFn> for MockBody {
    fn from(value: BodyFn) -> Self {
        MockBody::Callable(value)
    }
}

/// Declared response.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    /// Status code; 200 when unset.
    pub status: Option<u16>,
    /// Content type; always wins over inference when set.
    pub content_type: Option<String>,
    /// Encoding override for structured bodies.
    pub encoding: ResponseEncoding,
    /// The body.
    pub body: MockBody,
    /// Serialize XML under a single root instead of the Response/Result envelope.
    pub do_not_wrap: bool,
    /// Root element for unwrapped XML; `<Action>Response` when unset.
    pub root_tag: Option<String>,
    /// Extra headers, set after the defaults.
    pub extra_headers: Vec<(String, String)>,
}

impl MockResponse {
    /// Creates a 200 response with the given body.
    pub fn new(body: impl Into<MockBody>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Response that renders the standard error body in the request's
    /// format. Status defaults to 400.
    pub fn error(status: Option<u16>, code: impl Into<String>, message: impl Into<String>) -> Self {
        let error = ErrorResponse::new(code, message).with_status(status.unwrap_or(400));
        Self::new(MockBody::handler(move |rr| {
            error.render(rr.assumed_response).into_http_response()
        }))
    }

    /// Sets the status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the encoding override.
    pub fn with_encoding(mut self, encoding: ResponseEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Disables the XML envelope.
    pub fn unwrapped(mut self) -> Self {
        self.do_not_wrap = true;
        self
    }

    /// Sets the root element for unwrapped XML.
    pub fn with_root_tag(mut self, root_tag: impl Into<String>) -> Self {
        self.root_tag = Some(root_tag.into());
        self
    }

    /// Adds a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Renders the response for a request.
    ///
    /// `declared_action` is the action named by the matcher; the request's
    /// own action is used when the matcher did not name one.
    pub fn render(&self, rr: &ReceivedRequest, declared_action: Option<&str>) -> Rendered {
        if let MockBody::Handler(handler) = &self.body {
            return Rendered::Override(handler(rr));
        }

        let action = declared_action
            .or(rr.action.as_deref())
            .unwrap_or_default();

        match self.render_draft(rr, action) {
            Ok(draft) => Rendered::Draft(draft),
            Err(err) => {
                tracing::warn!(request = %rr.inspect(), error = %err, "mock body could not be rendered");
                Rendered::Draft(ErrorResponse::from_render_error(&err).render(rr.assumed_response))
            }
        }
    }

    fn render_draft(&self, rr: &ReceivedRequest, action: &str) -> Result<ResponseDraft, RenderError> {
        let status = self.status.unwrap_or(200);

        let (status, content_type, body) = match &self.body {
            MockBody::Empty => (status, CONTENT_TYPE_TEXT.to_string(), Vec::new()),
            MockBody::Text(text) => (
                status,
                infer_content_type(text).to_string(),
                text.clone().into_bytes(),
            ),
            MockBody::Bytes(bytes) => (status, sniff_content_type(bytes).to_string(), bytes.clone()),
            MockBody::Callable(f) => {
                let (body, produced_status, produced_type) = f.call(rr)?;
                let content_type = match produced_type {
                    Some(content_type) => content_type,
                    None => self
                        .content_type
                        .clone()
                        .unwrap_or_else(|| infer_content_type(&body).to_string()),
                };
                return Ok(ResponseDraft {
                    status: produced_status.unwrap_or(status),
                    content_type,
                    body: body.into_bytes(),
                    extra_headers: self.extra_headers.clone(),
                });
            }
            MockBody::Structured(value) => {
                let (content_type, body) = self.encode_structured(value, rr.assumed_response, action)?;
                (status, content_type.to_string(), body)
            }
            MockBody::Handler(_) => {
                return Err(RenderError::InvalidBodyFunc(
                    "handler bodies produce their own response".to_string(),
                ))
            }
        };

        Ok(ResponseDraft {
            status,
            content_type: self.content_type.clone().unwrap_or(content_type),
            body,
            extra_headers: self.extra_headers.clone(),
        })
    }

    fn encode_structured(
        &self,
        value: &Value,
        assumed: ResponseFormat,
        action: &str,
    ) -> Result<(&'static str, Vec<u8>), RenderError> {
        match (self.encoding, assumed) {
            (ResponseEncoding::Xml, _) | (ResponseEncoding::Default, ResponseFormat::Xml) => {
                Ok((CONTENT_TYPE_XML, self.encode_xml(value, action)?.into_bytes()))
            }
            (ResponseEncoding::Text, _) => Ok((CONTENT_TYPE_TEXT, serde_json::to_vec(value)?)),
            _ => Ok((CONTENT_TYPE_JSON, serde_json::to_vec(value)?)),
        }
    }

    fn encode_xml(&self, value: &Value, action: &str) -> Result<String, RenderError> {
        if self.do_not_wrap {
            let root = match &self.root_tag {
                Some(tag) => tag.clone(),
                None => format!("{}Response", action),
            };
            return xml::to_xml(&root, value);
        }

        let response_tag = format!("{}Response", ACTION_PLACEHOLDER);
        let result_tag = format!("{}Result", ACTION_PLACEHOLDER);

        let mut writer = XmlWriter::new();
        writer.open(&response_tag)?;
        writer.root(&result_tag, value)?;
        writer.open("ResponseMetadata")?;
        writer.text_element("RequestId", WRAPPED_REQUEST_ID)?;
        writer.close("ResponseMetadata");
        writer.close(&response_tag);

        xml::check_name(&format!("{}Response", action))?;
        Ok(writer.finish().replace(ACTION_PLACEHOLDER, action))
    }
}

/// Intermediate response: everything but the default headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDraft {
    /// Status code.
    pub status: u16,
    /// Content type.
    pub content_type: String,
    /// Body bytes.
    pub body: Vec<u8>,
    /// Headers set after the defaults.
    pub extra_headers: Vec<(String, String)>,
}

impl ResponseDraft {
    /// Returns the body as text, replacing invalid UTF-8.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Builds the wire response: `Content-Type`, `Server`, extra headers,
    /// then `Date` and a request id when still missing.
    pub fn into_http_response(self) -> Response<Vec<u8>> {
        let mut resp = Response::new(self.body);
        *resp.status_mut() = StatusCode::from_u16(self.status).unwrap_or_else(|_| {
            tracing::warn!(status = self.status, "invalid mock status code");
            StatusCode::INTERNAL_SERVER_ERROR
        });

        let headers = resp.headers_mut();
        let content_type = HeaderValue::from_str(&self.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(CONTENT_TYPE_TEXT));
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));

        for (name, value) in &self.extra_headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "skipping invalid mock header"),
            }
        }

        if !headers.contains_key(DATE) {
            let now = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            if let Ok(value) = HeaderValue::from_str(&now) {
                headers.insert(DATE, value);
            }
        }

        if !headers.contains_key(REQUEST_ID_HEADER) {
            if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
                headers.insert(REQUEST_ID_HEADER, value);
            }
        }

        resp
    }
}

/// Result of rendering a [`MockResponse`].
#[derive(Debug)]
pub enum Rendered {
    /// Needs default headers.
    Draft(ResponseDraft),
    /// Produced by a handler, sent untouched.
    Override(Response<Vec<u8>>),
}

impl Rendered {
    /// Converts into the wire response.
    pub fn into_http_response(self) -> Response<Vec<u8>> {
        match self {
            Rendered::Draft(draft) => draft.into_http_response(),
            Rendered::Override(resp) => resp,
        }
    }
}

/// Random UUID, or a fixed id when the OS random source fails.
pub fn generate_request_id() -> String {
    let mut bytes = [0u8; 16];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => uuid::Builder::from_random_bytes(bytes).into_uuid().to_string(),
        Err(_) => FALLBACK_REQUEST_ID.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Request};
    use serde_json::json;

    fn classified(content_type: &str, body: &str, auth_service: &str) -> ReceivedRequest {
        let req = Request::builder()
            .method(Method::POST)
            .uri("https://service.us-east-1.amazonaws.com/")
            .header("Content-Type", content_type)
            .header(
                "Authorization",
                format!("AWS4-HMAC-SHA256 Credential=k/20221030/us-east-1/{}/aws4_request", auth_service),
            )
            .body(body.as_bytes().to_vec())
            .unwrap();
        ReceivedRequest::classify(&req)
    }

    fn json_rr() -> ReceivedRequest {
        let mut rr = classified("application/x-amz-json-1.1", "{}", "ecs");
        rr.action = Some("DescribeServices".to_string());
        rr
    }

    fn xml_rr() -> ReceivedRequest {
        classified(
            "application/x-www-form-urlencoded",
            "Action=DescribeServices&Version=1",
            "ecs",
        )
    }

    fn text_rr() -> ReceivedRequest {
        let req = Request::builder()
            .uri("http://example.com/")
            .body(Vec::new())
            .unwrap();
        ReceivedRequest::classify(&req)
    }

    fn draft(rendered: Rendered) -> ResponseDraft {
        match rendered {
            Rendered::Draft(draft) => draft,
            Rendered::Override(_) => panic!("expected a draft"),
        }
    }

    fn services_body() -> Value {
        json!({"services": [{"serviceName": "someservice"}]})
    }

    #[test]
    fn structured_json_roundtrip() {
        let resp = MockResponse::new(services_body());
        let d = draft(resp.render(&json_rr(), Some("DescribeServices")));

        assert_eq!(d.status, 200);
        assert_eq!(d.content_type, "application/json");
        let parsed: Value = serde_json::from_slice(&d.body).unwrap();
        assert_eq!(parsed["services"][0]["serviceName"], "someservice");
    }

    #[test]
    fn structured_wrapped_xml() {
        let resp = MockResponse::new(services_body());
        let d = draft(resp.render(&xml_rr(), None));
        let body = d.body_text();

        assert_eq!(d.content_type, "text/xml");
        assert!(body.starts_with("<DescribeServicesResponse>"));
        assert!(body.contains("<DescribeServicesResult>"));
        assert!(body.contains("<ResponseMetadata>"));
        assert!(body.contains(&format!("<RequestId>{}</RequestId>", WRAPPED_REQUEST_ID)));
        assert!(body.contains("<serviceName>someservice</serviceName>"));
        assert!(!body.contains(ACTION_PLACEHOLDER));
        // result comes before metadata
        assert!(body.find("<DescribeServicesResult>") < body.find("<ResponseMetadata>"));
    }

    #[test]
    fn declared_action_names_the_envelope() {
        let resp = MockResponse::new(json!({"a": 1})).with_encoding(ResponseEncoding::Xml);
        let d = draft(resp.render(&text_rr(), Some("GetThing")));
        assert!(d.body_text().contains("<GetThingResult>"));
    }

    #[test]
    fn unwrapped_xml_uses_root_tag() {
        let resp = MockResponse::new(json!({"Value": "x"})).unwrapped();
        let d = draft(resp.render(&xml_rr(), None));
        assert_eq!(d.body_text(), "<DescribeServicesResponse>\n  <Value>x</Value>\n</DescribeServicesResponse>");

        let resp = MockResponse::new(json!({"Value": "x"})).unwrapped().with_root_tag("Custom");
        let d = draft(resp.render(&xml_rr(), None));
        assert!(d.body_text().starts_with("<Custom>"));
    }

    #[test]
    fn encoding_override_beats_assumed_format() {
        let resp = MockResponse::new(json!({"a": 1})).with_encoding(ResponseEncoding::Json);
        let d = draft(resp.render(&xml_rr(), None));
        assert_eq!(d.content_type, "application/json");
        assert_eq!(d.body, br#"{"a":1}"#);

        let resp = MockResponse::new(json!({"a": 1})).with_encoding(ResponseEncoding::Text);
        let d = draft(resp.render(&xml_rr(), None));
        assert_eq!(d.content_type, "text/plain");
    }

    #[test]
    fn text_assumed_structured_falls_back_to_json() {
        let d = draft(MockResponse::new(json!([1, 2])).render(&text_rr(), None));
        assert_eq!(d.content_type, "application/json");
        assert_eq!(d.body, b"[1,2]");
    }

    #[test]
    fn literal_text_infers_content_type() {
        let d = draft(MockResponse::new("<Thing/>").render(&text_rr(), None));
        assert_eq!(d.content_type, "text/xml");
        let d = draft(MockResponse::new("{\"a\":1}").render(&text_rr(), None));
        assert_eq!(d.content_type, "application/json");
        let d = draft(MockResponse::new("hello").with_status(202).render(&text_rr(), None));
        assert_eq!(d.content_type, "text/plain");
        assert_eq!(d.status, 202);
    }

    #[test]
    fn declared_content_type_wins() {
        let d = draft(
            MockResponse::new("<Thing/>")
                .with_content_type("application/custom")
                .render(&text_rr(), None),
        );
        assert_eq!(d.content_type, "application/custom");
    }

    #[test]
    fn bytes_are_sniffed() {
        let d = draft(MockResponse::new(b"\x89PNG\r\n\x1a\n....".to_vec()).render(&text_rr(), None));
        assert_eq!(d.content_type, "image/png");
    }

    #[test]
    fn callable_with_status_and_content_type() {
        let resp = MockResponse::new(BodyFn::with_content_type(|rr| {
            (format!("{{\"host\":\"{}\"}}", rr.hostname), 200, "application/json".to_string())
        }));
        let d = draft(resp.render(&text_rr(), None));
        assert_eq!(d.status, 200);
        assert_eq!(d.content_type, "application/json");
        assert_eq!(d.body_text(), "{\"host\":\"example.com\"}");
    }

    #[test]
    fn callable_defaults() {
        let resp = MockResponse::new(BodyFn::body(|_| "<Ok/>".to_string()));
        let d = draft(resp.render(&text_rr(), None));
        assert_eq!(d.status, 200);
        assert_eq!(d.content_type, "text/xml");

        let resp = MockResponse::new(BodyFn::with_status(|_| ("nope".to_string(), 404)));
        let d = draft(resp.render(&text_rr(), None));
        assert_eq!(d.status, 404);
        assert_eq!(d.content_type, "text/plain");
    }

    #[test]
    fn callable_values_shapes() {
        let resp = MockResponse::new(BodyFn::values(|_| vec![json!("body"), json!(201), json!("text/csv")]));
        let d = draft(resp.render(&text_rr(), None));
        assert_eq!((d.status, d.content_type.as_str()), (201, "text/csv"));

        let resp = MockResponse::new(BodyFn::values(|_| {
            vec![json!("body"), json!(200), json!("text/plain"), json!("extra")]
        }));
        let d = draft(resp.render(&json_rr(), None));
        assert_eq!(d.status, 400);
        let parsed: Value = serde_json::from_slice(&d.body).unwrap();
        assert_eq!(parsed["code"], "InvalidBodyFunc");

        let resp = MockResponse::new(BodyFn::values(|_| vec![json!(1)]));
        let d = draft(resp.render(&text_rr(), None));
        assert!(d.body_text().contains("InvalidBodyFunc"));
    }

    #[test]
    fn unserializable_xml_becomes_bad_mock_body() {
        let resp = MockResponse::new(json!({"bad key": 1}));
        let d = draft(resp.render(&xml_rr(), None));
        assert_eq!(d.status, 400);
        assert!(d.body_text().contains("<Code>BadMockBody</Code>"));
    }

    #[test]
    fn handler_bypasses_rendering() {
        let resp = MockResponse::new(MockBody::handler(|_| {
            Response::builder().status(418).body(b"teapot".to_vec()).unwrap()
        }))
        .with_status(200);
        match resp.render(&text_rr(), None) {
            Rendered::Override(r) => assert_eq!(r.status(), 418),
            Rendered::Draft(_) => panic!("expected override"),
        }
    }

    #[test]
    fn error_helper_uses_request_format() {
        let resp = MockResponse::error(None, "Throttled", "slow down");
        let http = resp.render(&xml_rr(), None).into_http_response();
        assert_eq!(http.status(), 400);
        let body = String::from_utf8(http.into_body()).unwrap();
        assert!(body.contains("<Code>Throttled</Code>"));
    }

    #[test]
    fn default_headers() {
        let resp = MockResponse::new("hi").with_header("X-Custom", "1");
        let http = resp.render(&text_rr(), None).into_http_response();
        let headers = http.headers();
        assert_eq!(headers["content-type"], "text/plain");
        assert_eq!(headers["server"], SERVER_NAME);
        assert_eq!(headers["x-custom"], "1");
        assert!(headers.contains_key("date"));
        assert_eq!(headers[REQUEST_ID_HEADER].len(), 36);
    }

    #[test]
    fn extra_headers_can_replace_request_id() {
        let resp = MockResponse::new("hi").with_header("X-Amzn-RequestId", "fixed");
        let http = resp.render(&text_rr(), None).into_http_response();
        assert_eq!(http.headers()[REQUEST_ID_HEADER], "fixed");
    }

    #[test]
    fn serialize_helper() {
        #[derive(Serialize)]
        struct Out {
            name: &'static str,
        }
        let body = MockBody::serialize(&Out { name: "x" }).unwrap();
        assert!(matches!(body, MockBody::Structured(ref v) if v["name"] == "x"));
    }
}
