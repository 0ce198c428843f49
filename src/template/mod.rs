//! Parameter placeholders in patch templates
//!
//! The only supported expression is a reference to a parameter value,
//! `{{ .Values.<name> }}`. A string made of exactly one placeholder takes the type of
//! the bound value, so integer parameters render as numbers. Placeholders mixed with
//! other text are interpolated, e.g. `"{{ .Values.cpu }}m"` renders as `"500m"`.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::api::IntOrString;
use crate::error::Error;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const VALUES: &str = ".Values.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated placeholder in '{0}'")]
    Unterminated(String),

    #[error("unsupported placeholder expression '{0}', expected '.Values.<name>'")]
    Unsupported(String),

    #[error("no value assigned to parameter '{0}'")]
    Missing(String),
}

impl From<TemplateError> for Error {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::Missing(_) => Error::data_shape(err),
            _ => Error::configuration(err),
        }
    }
}

/// Parameter values available to a template
pub type Bindings = BTreeMap<String, IntOrString>;

/// Format a placeholder for the given parameter
pub fn placeholder(name: &str) -> String {
    format!("{OPEN} {VALUES}{name} {CLOSE}")
}

enum Piece<'a> {
    Text(&'a str),
    Param(&'a str),
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn parse(s: &str) -> Result<Vec<Piece<'_>>, TemplateError> {
    let mut pieces = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            pieces.push(Piece::Text(&rest[..start]));
        }
        let after = &rest[start + OPEN.len()..];
        let end = after
            .find(CLOSE)
            .ok_or_else(|| TemplateError::Unterminated(s.to_string()))?;

        let expr = after[..end].trim();
        let name = expr
            .strip_prefix(VALUES)
            .filter(|name| !name.is_empty() && name.chars().all(is_name_char))
            .ok_or_else(|| TemplateError::Unsupported(expr.to_string()))?;
        pieces.push(Piece::Param(name));

        rest = &after[end + CLOSE.len()..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    Ok(pieces)
}

fn render_str(s: &str, bindings: &Bindings) -> Result<Value, TemplateError> {
    let pieces = parse(s)?;
    let lookup = |name: &str| {
        bindings
            .get(name)
            .ok_or_else(|| TemplateError::Missing(name.to_string()))
    };

    if let [Piece::Param(name)] = pieces.as_slice() {
        return Ok(match lookup(name)? {
            IntOrString::Int(v) => Value::from(*v),
            IntOrString::String(v) => Value::String(v.clone()),
        });
    }

    let mut out = String::with_capacity(s.len());
    for piece in pieces {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param(name) => out.push_str(&lookup(name)?.to_string()),
        }
    }
    Ok(Value::String(out))
}

/// Replace every placeholder in the tree with its bound value
pub fn render(template: &Value, bindings: &Bindings) -> Result<Value, TemplateError> {
    match template {
        Value::String(s) => render_str(s, bindings),
        Value::Array(items) => items
            .iter()
            .map(|item| render(item, bindings))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(fields) => {
            let mut out = serde_json::Map::new();
            for (key, value) in fields {
                out.insert(key.clone(), render(value, bindings)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Names of the parameters referenced by the tree
pub fn references(template: &Value) -> Result<BTreeSet<String>, TemplateError> {
    fn collect(value: &Value, names: &mut BTreeSet<String>) -> Result<(), TemplateError> {
        match value {
            Value::String(s) => {
                for piece in parse(s)? {
                    if let Piece::Param(name) = piece {
                        names.insert(name.to_string());
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    collect(item, names)?;
                }
            }
            Value::Object(fields) => {
                for value in fields.values() {
                    collect(value, names)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    let mut names = BTreeSet::new();
    collect(template, &mut names)?;
    Ok(names)
}
