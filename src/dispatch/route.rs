//! One mounted handler: transform, assemble, invoke, adapt.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{OriginalUri, Path, Query, Request};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{any, on, MethodRouter};
use futures::future::try_join_all;
use serde_json::Value;

use crate::auth::Claims;
use crate::container::Instance;
use crate::dispatch::args::{assemble, RequestRoot};
use crate::dispatch::Reply;
use crate::error::HttpError;
use crate::metadata::{ErasedHandler, ParameterBinding, PathVariableTransformer, RequestMethod, ResponseKind};

pub(crate) struct RouteHandler {
    pub component: String,
    pub method: String,
    pub instance: Instance,
    pub handler: ErasedHandler,
    /// Sorted by index.
    pub parameters: Vec<ParameterBinding>,
    pub transformers: Arc<HashMap<String, PathVariableTransformer>>,
    pub error_code: Option<StatusCode>,
    pub response: ResponseKind,
}

impl RouteHandler {
    pub fn into_method_router(self: Arc<Self>, method: RequestMethod) -> MethodRouter {
        let handler = move |params: Option<Path<HashMap<String, String>>>,
                            Query(query): Query<HashMap<String, String>>,
                            request: Request| {
            let route = self.clone();
            async move {
                let params = params.map(|Path(p)| p).unwrap_or_default();
                route.dispatch(params, query, request).await
            }
        };
        match method.filter() {
            Some(filter) => on(filter, handler),
            None => any(handler),
        }
    }

    async fn dispatch(
        self: Arc<Self>,
        params: HashMap<String, String>,
        query: HashMap<String, String>,
        request: Request,
    ) -> Response {
        match self.invoke(params, query, request).await {
            Ok(reply) => reply.into_http(self.response, self.error_code).await,
            // Failures before the reply exists bypass the method's error code.
            Err(err) => err.into_response_with(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    async fn invoke(
        &self,
        params: HashMap<String, String>,
        query: HashMap<String, String>,
        request: Request,
    ) -> Result<Reply, HttpError> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| HttpError::bad_request(format!("unreadable body: {}", e)))?;
        let user = parts.extensions.get::<Claims>().map(|c| c.0.clone());
        // Nested routers see a stripped URI; report the path as received.
        let path = parts
            .extensions
            .get::<OriginalUri>()
            .map(|u| u.0.path().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        let mut root = RequestRoot::new(
            parts.method.as_str(),
            &path,
            params,
            query,
            &parts.headers,
            &body,
            user,
        )?;

        self.transform(&mut root).await?;
        tracing::trace!(component = %self.component, method = %self.method, "params ready");

        let args = assemble(&self.parameters, &root.to_value())?;
        (self.handler)(self.instance.clone(), args)
    }

    /// Run every transformer that matches a present path variable,
    /// concurrently. The first failure fails the request.
    async fn transform(&self, root: &mut RequestRoot) -> Result<(), HttpError> {
        let jobs: Vec<_> = root
            .params
            .iter()
            .filter_map(|(name, raw)| {
                let transformer = self.transformers.get(name)?;
                let raw = raw.as_str().unwrap_or_default().to_string();
                let fut = (transformer.handler)(self.instance.clone(), raw, name.clone());
                let name = name.clone();
                let component = self.component.clone();
                Some(async move {
                    match fut.await {
                        Ok(v) => Ok::<(String, Value), HttpError>((name, v)),
                        Err(e) => {
                            tracing::warn!(component = %component, param = %name, error = %e, "path variable transform failed");
                            Err(e)
                        }
                    }
                })
            })
            .collect();
        if jobs.is_empty() {
            return Ok(());
        }
        for (name, value) in try_join_all(jobs).await? {
            root.params.insert(name, value);
        }
        Ok(())
    }
}
