//! JMESPath expressions over parsed JSON payloads.
//!
//! Backed by the `jmespath` crate, so filters, projections, pipes and
//! functions all work. A result of `null` is reported as `None`.
//!
//! Compiled `jmespath` expressions are reference counted and not `Send`;
//! [`PathExpr`] keeps the validated source text and recompiles per search.

use serde_json::Value;
use thiserror::Error;

/// Error compiling or evaluating a path expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The expression is empty.
    #[error("empty path expression")]
    Empty,

    /// The expression does not parse.
    #[error("invalid path expression {expression:?}: {message}")]
    Syntax { expression: String, message: String },

    /// The expression parsed but failed against the document, e.g. a
    /// function called with the wrong argument types.
    #[error("path expression {expression:?} failed: {message}")]
    Runtime { expression: String, message: String },
}

/// A validated path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
}

impl PathExpr {
    /// Compiles an expression, rejecting syntax errors.
    pub fn compile(expression: &str) -> Result<Self, PathError> {
        if expression.trim().is_empty() {
            return Err(PathError::Empty);
        }
        jmespath::compile(expression).map_err(|err| PathError::Syntax {
            expression: expression.to_string(),
            message: err.to_string(),
        })?;
        Ok(Self {
            source: expression.to_string(),
        })
    }

    /// Returns the expression text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluates the expression against a document.
    pub fn search(&self, document: &Value) -> Result<Option<Value>, PathError> {
        let runtime_error = |message: String| PathError::Runtime {
            expression: self.source.clone(),
            message,
        };

        let expr = jmespath::compile(&self.source).map_err(|err| PathError::Syntax {
            expression: self.source.clone(),
            message: err.to_string(),
        })?;
        let found = expr
            .search(document)
            .map_err(|err| runtime_error(err.to_string()))?;

        if found.is_null() {
            return Ok(None);
        }
        serde_json::to_value(&*found)
            .map(Some)
            .map_err(|err| runtime_error(err.to_string()))
    }
}

/// Compiles and evaluates in one step.
pub fn search(expression: &str, document: &Value) -> Result<Option<Value>, PathError> {
    PathExpr::compile(expression)?.search(document)
}
