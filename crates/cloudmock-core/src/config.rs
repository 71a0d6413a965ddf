//! Declarative rule files.
//!
//! ```json
//! {
//!   "fail_on_unmatched": true,
//!   "rules": [
//!     {
//!       "request": { "service": "sts", "action": "GetCallerIdentity" },
//!       "response": { "body": { "Account": "123456789012" } }
//!     },
//!     {
//!       "request": { "hostname": "169.254.169.254", "path_regex": "^/latest/meta-data/.*" },
//!       "response": { "body": "i-0123456789", "content_type": "text/plain" }
//!     }
//!   ]
//! }
//! ```
//!
//! A JSON string `body` is literal text, `body_base64` is raw bytes, and any
//! other JSON value is a structured body. `error` renders the standard error
//! body instead.

use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine;
use http::Method;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, Result};
use crate::jmes::PathExpr;
use crate::matcher::MockRequest;
use crate::request::Params;
use crate::response::{MockBody, MockResponse, ResponseEncoding};
use crate::rule::MockRule;

/// Top-level rule file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    /// Fail the session on unmatched requests; defaults to true.
    #[serde(default)]
    pub fail_on_unmatched: Option<bool>,
    /// Rules in priority order.
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// One rule.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    /// Matcher; empty matches everything.
    #[serde(default)]
    pub request: RequestSpec,
    /// Response; empty answers 200 with no body.
    #[serde(default)]
    pub response: ResponseSpec,
}

/// A parameter value: one string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ParamValues {
    /// Single value.
    One(String),
    /// Ordered values.
    Many(Vec<String>),
}

impl ParamValues {
    fn into_vec(self) -> Vec<String> {
        match self {
            ParamValues::One(value) => vec![value],
            ParamValues::Many(values) => values,
        }
    }
}

/// Matcher fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestSpec {
    #[serde(default)]
    pub strict: bool,
    pub hostname: Option<String>,
    pub service: Option<String>,
    pub action: Option<String>,
    pub path: Option<String>,
    pub path_regex: Option<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub imds: bool,
    pub body: Option<String>,
    pub params: Option<BTreeMap<String, ParamValues>>,
    /// Path expression -> expected scalar.
    #[serde(default)]
    pub payload: BTreeMap<String, Value>,
    pub max_match_count: Option<u64>,
}

/// Response fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseSpec {
    pub status: Option<u16>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub encoding: ResponseEncoding,
    pub body: Option<Value>,
    pub body_base64: Option<String>,
    #[serde(default)]
    pub do_not_wrap: bool,
    pub root_tag: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub error: Option<ErrorSpec>,
}

/// Error response shorthand.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorSpec {
    pub code: String,
    pub message: String,
}

impl RuleFile {
    /// Reads and parses a rule file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Parses rule file JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether unmatched requests fail the session.
    pub fn fail_on_unmatched(&self) -> bool {
        self.fail_on_unmatched.unwrap_or(true)
    }

    /// Builds the rules, validating regexes, methods and payload paths.
    pub fn into_rules(self) -> Result<Vec<MockRule>> {
        self.rules
            .into_iter()
            .enumerate()
            .map(|(index, spec)| spec.into_rule(index))
            .collect()
    }
}

impl RuleSpec {
    fn into_rule(self, index: usize) -> Result<MockRule> {
        Ok(MockRule::new(
            self.request.into_matcher()?,
            self.response.into_response(index)?,
        ))
    }
}

impl RequestSpec {
    fn into_matcher(self) -> Result<MockRequest> {
        let path_regex = self.path_regex.as_deref().map(Regex::new).transpose()?;
        let method = self
            .method
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| ConfigError::InvalidMethod(m.clone()))
            })
            .transpose()?;

        let mut payload = Vec::with_capacity(self.payload.len());
        for (path, expected) in self.payload {
            PathExpr::compile(&path)?;
            payload.push((path, expected.into()));
        }

        let params = self.params.map(|params| {
            params
                .into_iter()
                .map(|(key, values)| (key, values.into_vec()))
                .collect::<Params>()
        });

        Ok(MockRequest {
            strict: self.strict,
            hostname: self.hostname,
            service: self.service,
            action: self.action,
            path: self.path,
            path_regex,
            method,
            is_ec2_imds: self.imds,
            body: self.body,
            params,
            payload,
            predicate: None,
            max_match_count: self.max_match_count,
        })
    }
}

impl ResponseSpec {
    fn into_response(self, index: usize) -> Result<MockResponse> {
        if self.body.is_some() && self.body_base64.is_some() {
            return Err(ConfigError::InvalidRule {
                index,
                reason: "body and body_base64 are mutually exclusive".to_string(),
            });
        }

        if let Some(error) = self.error {
            if self.body.is_some() || self.body_base64.is_some() {
                return Err(ConfigError::InvalidRule {
                    index,
                    reason: "error responses cannot declare a body".to_string(),
                });
            }
            return Ok(MockResponse::error(self.status, error.code, error.message));
        }

        let body = match (self.body, self.body_base64) {
            (Some(Value::String(text)), _) => MockBody::Text(text),
            (Some(value), _) => MockBody::Structured(value),
            (None, Some(encoded)) => {
                MockBody::Bytes(base64::engine::general_purpose::STANDARD.decode(encoded.trim())?)
            }
            (None, None) => MockBody::Empty,
        };

        Ok(MockResponse {
            status: self.status,
            content_type: self.content_type,
            encoding: self.encoding,
            body,
            do_not_wrap: self.do_not_wrap,
            root_tag: self.root_tag,
            extra_headers: self.headers.into_iter().collect(),
        })
    }
}
