//! Controller, method and parameter mappings.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::container::Instance;
use crate::dispatch::{Args, Reply};
use crate::error::HttpError;

pub(crate) type ErasedHandler = Arc<dyn Fn(Instance, Args) -> Result<Reply, HttpError> + Send + Sync>;
pub(crate) type ErasedTransformer =
    Arc<dyn Fn(Instance, String, String) -> BoxFuture<'static, Result<Value, HttpError>> + Send + Sync>;
pub(crate) type BodyCoercion = Arc<dyn Fn(Value) -> Result<Value, HttpError> + Send + Sync>;

/// Default error status for rejected replies when neither the error nor the
/// method declares one.
pub const DEFAULT_ERROR_CODE: StatusCode = StatusCode::UNPROCESSABLE_ENTITY;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    /// Any method.
    All,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Delete => "DELETE",
            RequestMethod::Options => "OPTIONS",
            RequestMethod::All => "ALL",
        }
    }

    /// Filter for a concrete method; `None` for `All`.
    pub fn filter(&self) -> Option<MethodFilter> {
        match self {
            RequestMethod::Get => Some(MethodFilter::GET),
            RequestMethod::Post => Some(MethodFilter::POST),
            RequestMethod::Put => Some(MethodFilter::PUT),
            RequestMethod::Patch => Some(MethodFilter::PATCH),
            RequestMethod::Delete => Some(MethodFilter::DELETE),
            RequestMethod::Options => Some(MethodFilter::OPTIONS),
            RequestMethod::All => None,
        }
    }
}

/// How the resolved value of a handler is turned into a body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseKind {
    /// Follow the reply variant.
    #[default]
    Auto,
    /// The resolved value is a filesystem path streamed as the body.
    File,
    /// The resolved value is raw bytes written as the body.
    Download,
}

/// Middleware usable at application, controller or method level.
#[derive(Clone)]
pub struct Middleware {
    router: Arc<dyn Fn(Router) -> Router + Send + Sync>,
    method: Arc<dyn Fn(MethodRouter) -> MethodRouter + Send + Sync>,
}

impl Middleware {
    /// Wrap an `async fn(Request, Next) -> Response`.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Next) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let for_method = f.clone();
        Middleware {
            router: Arc::new(move |r: Router| r.layer(axum::middleware::from_fn(f.clone()))),
            method: Arc::new(move |m: MethodRouter| m.layer(axum::middleware::from_fn(for_method.clone()))),
        }
    }

    pub(crate) fn apply(&self, router: Router) -> Router {
        (self.router)(router)
    }

    pub(crate) fn apply_method(&self, route: MethodRouter) -> MethodRouter {
        (self.method)(route)
    }
}

/// Controller-level defaults. Paths may list several aliases; each alias
/// mounts the same sub-router.
#[derive(Clone)]
pub struct ControllerOptions {
    pub paths: Vec<String>,
    pub method: RequestMethod,
    pub error_code: Option<StatusCode>,
    pub middlewares: Vec<Middleware>,
    pub authenticated: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        ControllerOptions {
            paths: vec!["/".into()],
            method: RequestMethod::Get,
            error_code: Some(DEFAULT_ERROR_CODE),
            middlewares: Vec::new(),
            authenticated: false,
        }
    }
}

impl ControllerOptions {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ControllerOptions {
            paths: paths.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    pub fn method(mut self, method: RequestMethod) -> Self {
        self.method = method;
        self
    }

    pub fn error_code(mut self, code: Option<StatusCode>) -> Self {
        self.error_code = code;
        self
    }

    pub fn middleware(mut self, m: Middleware) -> Self {
        self.middlewares.push(m);
        self
    }
}

/// Per-method options; unset fields inherit the controller defaults.
#[derive(Clone, Default)]
pub struct MethodOptions {
    pub path: Option<String>,
    pub method: Option<RequestMethod>,
    pub error_code: Option<StatusCode>,
    pub middlewares: Vec<Middleware>,
    pub response: ResponseKind,
}

impl MethodOptions {
    pub fn new(method: RequestMethod, path: impl Into<String>) -> Self {
        MethodOptions {
            path: Some(path.into()),
            method: Some(method),
            ..Default::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(RequestMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(RequestMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(RequestMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(RequestMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(RequestMethod::Delete, path)
    }

    pub fn options(path: impl Into<String>) -> Self {
        Self::new(RequestMethod::Options, path)
    }

    pub fn all(path: impl Into<String>) -> Self {
        Self::new(RequestMethod::All, path)
    }

    pub fn error_code(mut self, code: StatusCode) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn middleware(mut self, m: Middleware) -> Self {
        self.middlewares.push(m);
        self
    }

    pub fn file(mut self) -> Self {
        self.response = ResponseKind::File;
        self
    }

    pub fn download(mut self) -> Self {
        self.response = ResponseKind::Download;
        self
    }
}

/// Options after merging a method over its controller.
#[derive(Clone)]
pub struct EffectiveOptions {
    pub path: String,
    pub method: RequestMethod,
    pub error_code: Option<StatusCode>,
    pub middlewares: Vec<Middleware>,
    pub response: ResponseKind,
}

impl EffectiveOptions {
    pub fn merge(controller: &ControllerOptions, method: &MethodOptions) -> Self {
        let path = match method.path.as_deref() {
            None | Some("") => "/".to_string(),
            Some(p) => p.to_string(),
        };
        EffectiveOptions {
            path,
            method: method.method.unwrap_or(controller.method),
            error_code: method.error_code.or(controller.error_code),
            middlewares: method.middlewares.clone(),
            response: method.response,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    RequestBody,
    PathVariable,
    RequestParam,
    Header,
    HttpRequest,
    HttpResponse,
}

/// How one handler argument is extracted from the request root
/// `{ "req": {...}, "res": {...} }`.
#[derive(Clone)]
pub struct ParameterBinding {
    pub index: usize,
    pub kind: ParamKind,
    pub path: Vec<String>,
    pub(crate) coerce: Option<BodyCoercion>,
}

impl ParameterBinding {
    pub fn at<I, S>(index: usize, kind: ParamKind, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ParameterBinding {
            index,
            kind,
            path: path.into_iter().map(Into::into).collect(),
            coerce: None,
        }
    }

    /// Request body coerced into `T`: the body's fields are copied over
    /// `T::default()`, so absent fields keep their defaults.
    pub fn body<T>(index: usize) -> Self
    where
        T: Default + Serialize + DeserializeOwned + 'static,
    {
        let mut binding = Self::body_value(index);
        binding.coerce = Some(Arc::new(coerce_into::<T>));
        binding
    }

    /// Request body passed through untouched.
    pub fn body_value(index: usize) -> Self {
        Self::at(index, ParamKind::RequestBody, ["req", "body"])
    }

    pub fn path_variable(index: usize, name: &str) -> Self {
        Self::at(index, ParamKind::PathVariable, ["req", "params", name])
    }

    pub fn query(index: usize, name: &str) -> Self {
        Self::at(index, ParamKind::RequestParam, ["req", "query", name])
    }

    pub fn header(index: usize, name: &str) -> Self {
        Self::at(
            index,
            ParamKind::Header,
            ["req".to_string(), "headers".to_string(), name.to_ascii_lowercase()],
        )
    }

    pub fn request(index: usize) -> Self {
        Self::at(index, ParamKind::HttpRequest, ["req"])
    }

    pub fn response(index: usize) -> Self {
        Self::at(index, ParamKind::HttpResponse, ["res"])
    }

    /// Walk the extraction path; a missing segment yields `Null`.
    pub fn extract(&self, root: &Value) -> Result<Value, HttpError> {
        let raw = self
            .path
            .iter()
            .try_fold(root, |v, seg| v.get(seg.as_str()))
            .cloned()
            .unwrap_or(Value::Null);
        match (&self.kind, &self.coerce) {
            (ParamKind::RequestBody, Some(coerce)) => coerce(raw),
            _ => Ok(raw),
        }
    }
}

fn coerce_into<T>(body: Value) -> Result<Value, HttpError>
where
    T: Default + Serialize + DeserializeOwned,
{
    let internal = |e: serde_json::Error| HttpError::internal(e.to_string());
    let mut base = serde_json::to_value(T::default()).map_err(internal)?;
    match (&mut base, body) {
        (Value::Object(fields), Value::Object(incoming)) => {
            for (k, v) in incoming {
                fields.insert(k, v);
            }
        }
        (_, Value::Null) => {}
        (_, other) => base = other,
    }
    let typed: T = serde_json::from_value(base)?;
    serde_json::to_value(typed).map_err(internal)
}

/// One handler method of a controller.
#[derive(Clone)]
pub struct MethodMapping {
    pub property: String,
    pub options: MethodOptions,
    pub parameters: Vec<ParameterBinding>,
    pub(crate) handler: Option<ErasedHandler>,
}

impl MethodMapping {
    pub fn new(property: &str) -> Self {
        MethodMapping {
            property: property.to_string(),
            options: MethodOptions::default(),
            parameters: Vec::new(),
            handler: None,
        }
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Bindings sorted by index. Registration order is arbitrary, so this is
    /// the only order argument assembly may use.
    pub fn sorted_parameters(&self) -> Vec<ParameterBinding> {
        let mut params = self.parameters.clone();
        params.sort_by_key(|p| p.index);
        params
    }
}

/// Coerces one path variable before the main handler runs.
#[derive(Clone)]
pub struct PathVariableTransformer {
    pub property: String,
    pub(crate) handler: ErasedTransformer,
}

/// Everything registered for one controller.
#[derive(Clone)]
pub struct ControllerMapping {
    pub component: String,
    /// `None` until the component is registered as a controller.
    pub options: Option<ControllerOptions>,
    pub mappings: HashMap<String, MethodMapping>,
    /// Transformers keyed by path variable name.
    pub params: HashMap<String, PathVariableTransformer>,
}

impl ControllerMapping {
    pub fn new(component: &str) -> Self {
        ControllerMapping {
            component: component.to_string(),
            options: None,
            mappings: HashMap::new(),
            params: HashMap::new(),
        }
    }
}
