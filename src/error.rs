//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::response::Message;
use crate::schedule::CronError;

/// Registration and startup errors. Any of these aborts startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing component: {0}")]
    MissingComponent(String),
    #[error("missing handler: {component}.{method}")]
    MissingHandler { component: String, method: String },
    #[error("component {0} is registered with a different type")]
    TypeMismatch(String),
    #[error("duplicate route: {method} {path}")]
    DuplicateRoute { method: String, path: String },
    #[error("duplicate base path: {0}")]
    DuplicateBasePath(String),
    #[error("duplicate parameter index {index} on {component}.{method}")]
    DuplicateParameter {
        component: String,
        method: String,
        index: usize,
    },
    #[error("no data source configured for {owner}.{property}")]
    MissingDataSource { owner: String, property: String },
    #[error("controller {0} requires authentication but no token verifier is configured")]
    MissingVerifier(String),
    #[error(transparent)]
    Cron(#[from] CronError),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("data source: {0}")]
    DataSource(String),
    #[error("dependency {0} is not wired")]
    NotWired(String),
}

/// Per-request error. Serialized as `{messageCode, message, ...extra}`; the
/// status itself never appears in the body.
#[derive(Debug, Clone)]
pub struct HttpError {
    pub status: Option<StatusCode>,
    pub message_code: Option<i64>,
    pub message: Value,
    pub extra: Map<String, Value>,
}

impl HttpError {
    pub fn new(message_code: i64, message: Message) -> Self {
        HttpError {
            status: None,
            message_code: Some(message_code),
            message: message.into(),
            extra: Map::new(),
        }
    }

    /// Error with a plain string message and no code.
    pub fn msg(message: impl Into<String>) -> Self {
        HttpError {
            status: None,
            message_code: None,
            message: Value::String(message.into()),
            extra: Map::new(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::msg(message).with_status(StatusCode::BAD_REQUEST)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::msg(message).with_status(StatusCode::NOT_FOUND)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::msg(message).with_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Status for the response: carried status, else `fallback`.
    pub fn status_or(&self, fallback: StatusCode) -> StatusCode {
        self.status.unwrap_or(fallback)
    }

    /// Body with `messageCode` defaulting to the numeric status.
    pub fn body(&self, status: StatusCode) -> ErrorBody {
        ErrorBody {
            message_code: self.message_code.unwrap_or(i64::from(status.as_u16())),
            message: self.message.clone(),
            extra: self.extra.clone(),
        }
    }

    /// Full response using `fallback` when no status is carried.
    pub fn into_response_with(self, fallback: StatusCode) -> Response {
        let status = self.status_or(fallback);
        (status, Json(self.body(status))).into_response()
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl std::error::Error for HttpError {}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    #[serde(rename = "messageCode")]
    pub message_code: i64,
    pub message: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        self.into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<AppError> for HttpError {
    fn from(e: AppError) -> Self {
        tracing::warn!(error = %e, "request failed on infrastructure error");
        HttpError::internal(e.to_string())
    }
}

/// Client input that fails to deserialize. Server-side serialization maps
/// to `internal` at the call site.
impl From<serde_json::Error> for HttpError {
    fn from(e: serde_json::Error) -> Self {
        HttpError::bad_request(e.to_string())
    }
}
