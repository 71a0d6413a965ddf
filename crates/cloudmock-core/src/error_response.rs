//! Structured error bodies in the three response formats.

use serde::Serialize;

use crate::error::RenderError;
use crate::request::{ResponseFormat, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, CONTENT_TYPE_XML};
use crate::response::ResponseDraft;
use crate::xml::escape;

/// Request id carried by every error body.
pub const ERROR_REQUEST_ID: &str = "7a62c49f-347e-4fc4-9331-6e8eEXAMPLE";

/// Code used when no rule matched.
pub const CODE_UNMATCHED: &str = "AccessDenied";
/// Code used when a mock body cannot be serialized.
pub const CODE_BAD_MOCK_BODY: &str = "BadMockBody";
/// Code used when a callable body returned an unsupported shape.
pub const CODE_INVALID_BODY_FUNC: &str = "InvalidBodyFunc";

/// An API-style error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// Fault side; always `Sender`.
    #[serde(skip)]
    pub error_type: String,
    /// Error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Request id echoed in XML bodies.
    #[serde(skip)]
    pub request_id: String,
    /// HTTP status, 501 unless overridden.
    #[serde(skip)]
    pub status: u16,
}

impl ErrorResponse {
    /// Creates an error with status 501.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: "Sender".to_string(),
            code: code.into(),
            message: message.into(),
            request_id: ERROR_REQUEST_ID.to_string(),
            status: 501,
        }
    }

    /// The fallback returned when no rule matched.
    pub fn unmatched() -> Self {
        Self::new(CODE_UNMATCHED, "No matching request mock was found for this")
    }

    /// Maps a rendering failure onto `BadMockBody` or `InvalidBodyFunc` (status 400).
    pub fn from_render_error(err: &RenderError) -> Self {
        let code = match err {
            RenderError::InvalidBodyFunc(_) => CODE_INVALID_BODY_FUNC,
            RenderError::InvalidElementName(_) | RenderError::Json(_) => CODE_BAD_MOCK_BODY,
        };
        Self::new(code, err.to_string()).with_status(400)
    }

    /// Overrides the status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Renders the error in the given format.
    pub fn render(&self, format: ResponseFormat) -> ResponseDraft {
        let (content_type, body) = match format {
            ResponseFormat::Json => (
                CONTENT_TYPE_JSON,
                serde_json::to_string(self).unwrap_or_else(|_| self.text()),
            ),
            ResponseFormat::Xml => (CONTENT_TYPE_XML, self.xml()),
            ResponseFormat::Text => (CONTENT_TYPE_TEXT, self.text()),
        };

        ResponseDraft {
            status: self.status,
            content_type: content_type.to_string(),
            body: body.into_bytes(),
            extra_headers: Vec::new(),
        }
    }

    fn text(&self) -> String {
        format!("ERROR! {}: {}", self.code, self.message)
    }

    fn xml(&self) -> String {
        format!(
            "<ErrorResponse>\n  <Error>\n    <Type>{}</Type>\n    <Code>{}</Code>\n    <Message>{}</Message>\n  </Error>\n  <RequestId>{}</RequestId>\n</ErrorResponse>",
            escape(&self.error_type),
            escape(&self.code),
            escape(&self.message),
            escape(&self.request_id),
        )
    }
}
