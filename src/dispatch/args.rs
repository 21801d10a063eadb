//! Request root and positional handler arguments.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::http::{header, HeaderMap};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::error::HttpError;
use crate::metadata::ParameterBinding;

/// Positional handler arguments, ordered by binding index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Args(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw argument; `Null` past the end.
    pub fn value(&self, index: usize) -> &Value {
        self.0.get(index).unwrap_or(&Value::Null)
    }

    /// Argument deserialized into `T`; a mismatch is a 400.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, HttpError> {
        serde_json::from_value(self.value(index).clone())
            .map_err(|e| HttpError::bad_request(format!("argument {}: {}", index, e)))
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

/// Build arguments from bindings already sorted by index. Gaps in the index
/// sequence are not filled; the n-th binding lands in slot n.
pub(crate) fn assemble(bindings: &[ParameterBinding], root: &Value) -> Result<Args, HttpError> {
    bindings
        .iter()
        .map(|b| b.extract(root))
        .collect::<Result<Vec<_>, _>>()
        .map(Args)
}

/// The per-request lookup tree parameters are extracted from.
pub(crate) struct RequestRoot {
    pub params: Map<String, Value>,
    pub query: Map<String, Value>,
    pub headers: Map<String, Value>,
    pub body: Value,
    pub method: String,
    pub path: String,
    pub user: Value,
}

impl RequestRoot {
    pub fn new(
        method: &str,
        path: &str,
        params: HashMap<String, String>,
        query: HashMap<String, String>,
        headers: &HeaderMap,
        body: &Bytes,
        user: Option<Value>,
    ) -> Result<Self, HttpError> {
        Ok(RequestRoot {
            params: params.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
            query: query.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
            headers: header_map(headers),
            body: parse_body(headers, body)?,
            method: method.to_string(),
            path: path.to_string(),
            user: user.unwrap_or(Value::Null),
        })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "req": {
                "params": self.params,
                "query": self.query,
                "headers": self.headers,
                "body": self.body,
                "method": self.method,
                "path": self.path,
                "user": self.user,
            },
            "res": {
                "locals": { "jwtPayload": self.user },
            },
        })
    }
}

/// Lowercase names; repeated headers are joined with ", ".
fn header_map(headers: &HeaderMap) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, value) in headers {
        let v = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match out.get_mut(name.as_str()) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&v);
            }
            _ => {
                out.insert(name.as_str().to_string(), Value::String(v));
            }
        }
    }
    out
}

/// Empty body is `Null`. JSON (or untyped) and form bodies must parse;
/// anything else is kept as text.
fn parse_body(headers: &HeaderMap, body: &Bytes) -> Result<Value, HttpError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type.is_empty() || content_type.contains("json") {
        serde_json::from_slice(body).map_err(|e| HttpError::bad_request(format!("invalid JSON body: {}", e)))
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        parse_form(body)
    } else {
        Ok(Value::String(String::from_utf8_lossy(body).into_owned()))
    }
}

/// Form fields as a JSON object of strings; a repeated key becomes an array.
fn parse_form(body: &Bytes) -> Result<Value, HttpError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
        .map_err(|e| HttpError::bad_request(format!("invalid form body: {}", e)))?;
    let mut out = Map::new();
    for (key, value) in pairs {
        let value = Value::String(value);
        match out.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                out.insert(key, value);
            }
        }
    }
    Ok(Value::Object(out))
}
