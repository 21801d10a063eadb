//! Handler replies and their translation into HTTP responses.

use std::convert::Infallible;
use std::future::Future;
use std::path::PathBuf;

use axum::body::{Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::error::HttpError;
use crate::metadata::{ResponseKind, DEFAULT_ERROR_CODE};

/// A settled handler value.
#[derive(Debug, Clone)]
pub enum Output {
    Json(Value),
    /// Filesystem path, streamed as the body.
    Path(PathBuf),
    Bytes(Bytes),
}

impl From<Value> for Output {
    fn from(v: Value) -> Self {
        Output::Json(v)
    }
}

impl From<String> for Output {
    fn from(s: String) -> Self {
        Output::Json(Value::String(s))
    }
}

impl From<&str> for Output {
    fn from(s: &str) -> Self {
        Output::Json(Value::String(s.to_string()))
    }
}

impl From<PathBuf> for Output {
    fn from(p: PathBuf) -> Self {
        Output::Path(p)
    }
}

impl From<Bytes> for Output {
    fn from(b: Bytes) -> Self {
        Output::Bytes(b)
    }
}

impl From<Vec<u8>> for Output {
    fn from(b: Vec<u8>) -> Self {
        Output::Bytes(Bytes::from(b))
    }
}

/// What a handler returns.
pub enum Reply {
    /// Sent as-is: strings as text, everything else as JSON.
    Immediate(Output),
    /// Awaited; success is JSON, rejection uses the error status or the
    /// method's error code.
    Deferred(BoxFuture<'static, Result<Output, HttpError>>),
    /// Each item is written as one JSON line.
    Stream(BoxStream<'static, Value>),
}

impl Reply {
    pub fn immediate(value: impl Into<Output>) -> Self {
        Reply::Immediate(value.into())
    }

    pub fn deferred<F, T>(fut: F) -> Self
    where
        F: Future<Output = Result<T, HttpError>> + Send + 'static,
        T: Into<Output>,
    {
        Reply::Deferred(fut.map(|r| r.map(Into::into)).boxed())
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        Reply::Stream(stream.boxed())
    }

    /// Deferred reply that is already resolved.
    pub fn resolved<T: Serialize>(value: T) -> Self {
        let settled = serde_json::to_value(value)
            .map(Output::Json)
            .map_err(|e| HttpError::internal(e.to_string()));
        Reply::Deferred(futures::future::ready(settled).boxed())
    }

    /// Deferred reply that is already rejected.
    pub fn rejected(err: HttpError) -> Self {
        Reply::Deferred(futures::future::ready(Err(err)).boxed())
    }

    /// Settle to a single value; streams cannot be settled.
    pub(crate) async fn settle(self) -> Result<Output, HttpError> {
        match self {
            Reply::Immediate(out) => Ok(out),
            Reply::Deferred(fut) => fut.await,
            Reply::Stream(_) => Err(HttpError::internal("a stream reply cannot be sent as a file")),
        }
    }

    /// Adapt to a response according to the method's response kind.
    pub(crate) async fn into_http(self, kind: ResponseKind, error_code: Option<StatusCode>) -> Response {
        match kind {
            ResponseKind::File => match self.settle().await {
                Ok(out) => send_file(out).await,
                Err(e) => e.into_response_with(error_code.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)),
            },
            ResponseKind::Download => match self.settle().await {
                Ok(out) => send_download(out),
                Err(e) => e.into_response_with(error_code.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)),
            },
            ResponseKind::Auto => match self {
                Reply::Immediate(Output::Json(Value::String(s))) => s.into_response(),
                Reply::Immediate(out) => send_output(out).await,
                Reply::Deferred(fut) => match fut.await {
                    Ok(out) => send_output(out).await,
                    Err(e) => e.into_response_with(error_code.unwrap_or(DEFAULT_ERROR_CODE)),
                },
                Reply::Stream(stream) => send_stream(stream),
            },
        }
    }
}

async fn send_output(out: Output) -> Response {
    match out {
        Output::Json(v) => Json(v).into_response(),
        Output::Path(p) => serve_path(p).await,
        Output::Bytes(b) => send_download(Output::Bytes(b)),
    }
}

async fn send_file(out: Output) -> Response {
    match out {
        Output::Path(p) => serve_path(p).await,
        Output::Json(Value::String(s)) => serve_path(PathBuf::from(s)).await,
        Output::Bytes(b) => send_download(Output::Bytes(b)),
        Output::Json(_) => HttpError::internal("file reply must resolve to a path").into_response(),
    }
}

async fn serve_path(path: PathBuf) -> Response {
    match ServeFile::new(path).oneshot(Request::new(Body::empty())).await {
        Ok(res) => res.into_response(),
        Err(never) => match never {},
    }
}

fn send_download(out: Output) -> Response {
    let bytes = match out {
        Output::Bytes(b) => b,
        Output::Json(Value::String(s)) => Bytes::from(s),
        Output::Json(v) => Bytes::from(v.to_string()),
        Output::Path(p) => Bytes::from(p.to_string_lossy().into_owned()),
    };
    ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
}

fn send_stream(stream: BoxStream<'static, Value>) -> Response {
    let lines = stream.map(|v| Ok::<_, Infallible>(Bytes::from(format!("{}\n", v))));
    ([(header::CONTENT_TYPE, "application/x-ndjson")], Body::from_stream(lines)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn body_of(res: Response) -> (StatusCode, Vec<u8>) {
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn deferred_rejection_uses_error_code_then_default() {
        let res = Reply::rejected(HttpError::msg("nope"))
            .into_http(ResponseKind::Auto, Some(StatusCode::NOT_FOUND))
            .await;
        let (status, body) = body_of(res).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "messageCode": 404, "message": "nope" }));

        let res = Reply::rejected(HttpError::msg("nope")).into_http(ResponseKind::Auto, None).await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let carried = HttpError::msg("gone").with_status(StatusCode::GONE);
        let res = Reply::rejected(carried)
            .into_http(ResponseKind::Auto, Some(StatusCode::NOT_FOUND))
            .await;
        assert_eq!(res.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn unserializable_resolved_values_are_server_errors() {
        let value = std::collections::HashMap::from([((1, 2), 3)]);
        let res = Reply::resolved(value)
            .into_http(ResponseKind::Auto, Some(StatusCode::NOT_FOUND))
            .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn immediate_strings_are_text() {
        let res = Reply::immediate("hello").into_http(ResponseKind::Auto, None).await;
        let (status, body) = body_of(res).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"hello");

        let res = Reply::immediate(json!({ "a": 1 })).into_http(ResponseKind::Auto, None).await;
        let (_, body) = body_of(res).await;
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn stream_writes_one_line_per_item() {
        let items = futures::stream::iter(vec![json!(1), json!({ "b": 2 })]);
        let res = Reply::stream(items).into_http(ResponseKind::Auto, None).await;
        let (_, body) = body_of(res).await;
        assert_eq!(String::from_utf8(body).unwrap(), "1\n{\"b\":2}\n");
    }

    #[tokio::test]
    async fn download_rejection_falls_back_to_500() {
        let res = Reply::rejected(HttpError::msg("x"))
            .into_http(ResponseKind::Download, None)
            .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let res = Reply::deferred(async { Ok::<_, HttpError>(vec![1u8, 2, 3]) })
            .into_http(ResponseKind::Download, None)
            .await;
        let (status, body) = body_of(res).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn file_reply_streams_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        std::fs::write(&path, "report body").unwrap();
        let res = Reply::deferred(async move { Ok::<_, HttpError>(path) })
            .into_http(ResponseKind::File, None)
            .await;
        let (status, body) = body_of(res).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"report body");
    }
}
