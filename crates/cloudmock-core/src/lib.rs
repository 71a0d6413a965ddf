//! Cloudmock Core - request classification, rule matching and response synthesis.
//!
//! This crate is the synchronous engine behind the cloudmock proxy. It knows
//! nothing about sockets or TLS: it takes a fully read HTTP request whose URI
//! is absolute and produces the HTTP response a cloud API would have sent.
//!
//! ## Pipeline
//!
//! ```text
//! http::Request ─► ReceivedRequest::classify ─► rules (in order) ─► MockResponse::render
//!                      │                             │ first try_claim wins
//!                      │                             ▼
//!                      │                        no match: 501 AccessDenied
//!                      ▼                              + SessionMonitor
//!                 TrafficDebug dumps
//! ```
//!
//! ## Protocols
//!
//! - JSON protocol: `X-Amz-Target` names the operation, bodies are JSON.
//! - Query protocol: form-encoded `Action=...`, responses are XML wrapped in
//!   `<ActionResponse><ActionResult>` with a `ResponseMetadata` sibling.

pub mod config;
pub mod debug;
pub mod dispatcher;
pub mod error;
pub mod error_response;
pub mod jmes;
pub mod matcher;
pub mod request;
pub mod response;
pub mod rule;
pub mod session;
pub mod sniff;
pub mod xml;

pub use config::RuleFile;
pub use debug::{set_global_debug, DebugMode, DebugSink, TrafficDebug, DEBUG_ENV_VAR};
pub use dispatcher::Dispatcher;
pub use error::{ConfigError, RenderError};
pub use error_response::ErrorResponse;
pub use matcher::{MockRequest, PayloadExpectation};
pub use request::{ReceivedRequest, ResponseFormat};
pub use response::{BodyFn, MockBody, MockResponse, Rendered, ResponseDraft, ResponseEncoding};
pub use rule::MockRule;
pub use session::SessionMonitor;
