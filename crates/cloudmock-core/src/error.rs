//! Error types for the mock engine.

use thiserror::Error;

/// Failure while turning a mock response into wire bytes.
///
/// These never escape a request: the synthesizer converts them into a
/// structured error body (`BadMockBody` / `InvalidBodyFunc`).
#[derive(Debug, Error)]
pub enum RenderError {
    /// A structured body produced a name that is not a legal XML element.
    #[error("invalid XML element name: {0:?}")]
    InvalidElementName(String),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A callable body returned an unsupported shape.
    #[error("invalid body function: {0}")]
    InvalidBodyFunc(String),
}

/// Failure while loading declarative rules.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the rule file.
    #[error("failed to read rules: {0}")]
    Io(#[from] std::io::Error),

    /// The rule file is not valid JSON or has unknown fields.
    #[error("invalid rule file: {0}")]
    Json(#[from] serde_json::Error),

    /// A `path_regex` did not compile.
    #[error("invalid path regex: {0}")]
    Regex(#[from] regex::Error),

    /// A payload path expression did not compile.
    #[error("invalid payload path: {0}")]
    PayloadPath(#[from] crate::jmes::PathError),

    /// The HTTP method is not a valid token.
    #[error("invalid HTTP method: {0:?}")]
    InvalidMethod(String),

    /// `body_base64` is not valid base64.
    #[error("invalid base64 body: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// A response field combination makes no sense.
    #[error("invalid rule {index}: {reason}")]
    InvalidRule {
        /// Position of the rule in the file.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result type for rule loading.
pub type Result<T> = std::result::Result<T, ConfigError>;
