//! Minimal XML writer for query-protocol responses.
//!
//! Structured values map to elements the way map-to-XML encoders usually do:
//!
//! - object keys become child elements
//! - an array under a key repeats that key's element once per item
//! - keys starting with `-` become attributes, `#text` becomes element text
//! - `null` and empty objects render as empty elements

use serde_json::{Map, Value};

use crate::error::RenderError;

const INDENT: &str = "  ";

/// Element name used for items of a bare array.
const LIST_ITEM: &str = "member";

/// Indented XML builder.
#[derive(Debug, Default)]
pub struct XmlWriter {
    out: String,
    depth: usize,
}

impl XmlWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an element.
    pub fn open(&mut self, name: &str) -> Result<(), RenderError> {
        check_name(name)?;
        self.line(&format!("<{}>", name));
        self.depth += 1;
        Ok(())
    }

    /// Closes the element opened last.
    pub fn close(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(&format!("</{}>", name));
    }

    /// Writes `<name>text</name>`.
    pub fn text_element(&mut self, name: &str, text: &str) -> Result<(), RenderError> {
        check_name(name)?;
        self.line(&format!("<{0}>{1}</{0}>", name, escape(text)));
        Ok(())
    }

    /// Writes a structured value as the element `name`.
    pub fn value(&mut self, name: &str, value: &Value) -> Result<(), RenderError> {
        match value {
            Value::Array(items) => {
                for item in items {
                    self.single(name, item)?;
                }
                Ok(())
            }
            other => self.single(name, other),
        }
    }

    /// Writes a value as the root element; bare arrays become `<member>` children.
    pub fn root(&mut self, name: &str, value: &Value) -> Result<(), RenderError> {
        match value {
            Value::Array(items) => {
                self.open(name)?;
                for item in items {
                    self.single(LIST_ITEM, item)?;
                }
                self.close(name);
                Ok(())
            }
            other => self.single(name, other),
        }
    }

    /// Returns the rendered document.
    pub fn finish(self) -> String {
        self.out
    }

    fn single(&mut self, name: &str, value: &Value) -> Result<(), RenderError> {
        check_name(name)?;
        match value {
            Value::Null => {
                self.line(&format!("<{}/>", name));
                Ok(())
            }
            Value::Object(map) => self.object(name, map),
            Value::Array(items) => {
                self.open(name)?;
                for item in items {
                    self.single(LIST_ITEM, item)?;
                }
                self.close(name);
                Ok(())
            }
            scalar => self.text_element(name, &scalar_text(scalar)),
        }
    }

    fn object(&mut self, name: &str, map: &Map<String, Value>) -> Result<(), RenderError> {
        let mut attrs = String::new();
        let mut text = None;
        let mut children = Vec::new();

        for (key, value) in map {
            if let Some(attr) = key.strip_prefix('-') {
                check_name(attr)?;
                attrs.push_str(&format!(" {}=\"{}\"", attr, escape(&scalar_text(value))));
            } else if key == "#text" {
                text = Some(scalar_text(value));
            } else {
                children.push((key, value));
            }
        }

        if children.is_empty() {
            match text {
                Some(text) => self.line(&format!("<{0}{1}>{2}</{0}>", name, attrs, escape(&text))),
                None => self.line(&format!("<{}{}/>", name, attrs)),
            }
            return Ok(());
        }

        self.line(&format!("<{}{}>", name, attrs));
        self.depth += 1;
        if let Some(text) = text {
            self.line(&escape(&text));
        }
        for (key, value) in children {
            self.value(key, value)?;
        }
        self.close(name);
        Ok(())
    }

    fn line(&mut self, content: &str) {
        if !self.out.is_empty() {
            self.out.push('\n');
        }
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(content);
    }
}

/// Serializes `value` under a root element.
pub fn to_xml(root: &str, value: &Value) -> Result<String, RenderError> {
    let mut writer = XmlWriter::new();
    writer.root(root, value)?;
    Ok(writer.finish())
}

/// Escapes text for element content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn check_name(name: &str) -> Result<(), RenderError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == ':' => chars
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(RenderError::InvalidElementName(name.to_string()))
    }
}
