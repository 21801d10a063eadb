//! Application builder: registration surface, startup sequence and serving.

use std::future::Future;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use futures::FutureExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth::{JwtVerifier, TokenVerifier};
use crate::config::{normalize_path, ServerConfig};
use crate::container::{
    component_binder, persistence_binder, repository_binder, Component, ComponentRegistry, Inject, Instance,
};
use crate::data::{DataSource, PgDataSource, Repository};
use crate::dispatch::{Args, Reply};
use crate::error::{AppError, ConfigError, HttpError};
use crate::metadata::{
    ControllerMapping, ControllerOptions, ErasedHandler, ErasedTransformer, InjectionBinding, InjectionMetadata,
    InjectionTarget, Metadata, MethodMapping, MethodOptions, Middleware, ParameterBinding, PathVariableTransformer,
};
use crate::routes::{build_router, common_routes};
use crate::schedule::{ErasedTask, ProcessRole, Schedule, TaskOptions, TaskScheduler};

fn type_mismatch<C: Component>() -> HttpError {
    HttpError::internal(format!("component {} has an unexpected type", C::name()))
}

/// Collects registrations, then wires and serves them.
pub struct Application {
    config: ServerConfig,
    metadata: Metadata,
    components: ComponentRegistry,
    scheduler: TaskScheduler,
    data_source: Option<Arc<dyn DataSource>>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    jwt: JwtVerifier,
    middlewares: Vec<Middleware>,
}

impl Application {
    /// A PostgreSQL data source is configured when `database_url` is set.
    pub fn new(config: ServerConfig) -> Self {
        let jwt = JwtVerifier::new(&config.token, config.jwt_expires_in());
        let data_source = config
            .database_url
            .as_ref()
            .map(|url| Arc::new(PgDataSource::new(url.clone())) as Arc<dyn DataSource>);
        Application {
            scheduler: TaskScheduler::new(ProcessRole::from_flag(config.coordinator)),
            verifier: Some(Arc::new(jwt.clone())),
            jwt,
            data_source,
            config,
            metadata: Metadata::default(),
            components: ComponentRegistry::new(),
            middlewares: Vec::new(),
        }
    }

    pub fn with_data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
        self.data_source = Some(data_source);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Serve without a token gate. Authenticated controllers then fail startup.
    pub fn without_verifier(mut self) -> Self {
        self.verifier = None;
        self
    }

    /// Override the role taken from the config. Call before registering tasks.
    pub fn with_role(mut self, role: ProcessRole) -> Self {
        self.scheduler.set_role(role);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Token issuer sharing the gate's secret.
    pub fn jwt(&self) -> JwtVerifier {
        self.jwt.clone()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Application-wide middleware, outside every controller.
    pub fn middleware(&mut self, m: Middleware) -> &mut Self {
        self.middlewares.push(m);
        self
    }

    /// Register a plain component (helper, cron job). Returns the singleton.
    pub fn component<C: Component>(&mut self, instance: C) -> Result<Arc<C>, ConfigError> {
        self.components.register_with(|| instance)
    }

    /// Register `instance` as a controller mounted at `options.paths`.
    pub fn controller<C: Component>(
        &mut self,
        instance: C,
        options: ControllerOptions,
    ) -> Result<ControllerScope<'_, C>, ConfigError> {
        self.components.register_with(|| instance)?;
        self.metadata
            .controllers
            .change_with_default(C::name(), ControllerMapping::new(C::name()), |m| {
                m.options = Some(options);
            });
        Ok(self.scope())
    }

    /// Registration helpers bound to `C`.
    pub fn scope<C: Component>(&mut self) -> ControllerScope<'_, C> {
        ControllerScope {
            app: self,
            _component: PhantomData,
        }
    }

    fn with_method<C: Component>(&mut self, property: &str, f: impl FnOnce(&mut MethodMapping)) {
        self.metadata
            .controllers
            .change_with_default(C::name(), ControllerMapping::new(C::name()), |m| {
                let entry = m
                    .mappings
                    .entry(property.to_string())
                    .or_insert_with(|| MethodMapping::new(property));
                f(entry);
            });
    }

    /// Map `C::property` to a route.
    pub fn method<C, F>(&mut self, property: &str, options: MethodOptions, handler: F) -> &mut Self
    where
        C: Component,
        F: Fn(Arc<C>, Args) -> Result<Reply, HttpError> + Send + Sync + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |instance: Instance, args: Args| {
            let component = instance.downcast::<C>().map_err(|_| type_mismatch::<C>())?;
            handler(component, args)
        });
        self.with_method::<C>(property, |m| {
            m.options = options;
            m.handler = Some(erased);
        });
        self
    }

    /// Bind one argument of `C::property`. Order of calls does not matter.
    pub fn param<C: Component>(&mut self, property: &str, binding: ParameterBinding) -> &mut Self {
        self.with_method::<C>(property, |m| m.parameters.push(binding));
        self
    }

    /// Transform path variable `name` with `C::property` before any handler
    /// of `C` runs.
    pub fn path_variable<C, F, Fut>(&mut self, name: &str, property: &str, transform: F) -> &mut Self
    where
        C: Component,
        F: Fn(Arc<C>, String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HttpError>> + Send + 'static,
    {
        let erased: ErasedTransformer = Arc::new(move |instance: Instance, raw: String, name: String| {
            match instance.downcast::<C>() {
                Ok(component) => transform(component, raw, name).boxed(),
                Err(_) => futures::future::ready(Err(type_mismatch::<C>())).boxed(),
            }
        });
        let transformer = PathVariableTransformer {
            property: property.to_string(),
            handler: erased,
        };
        self.metadata
            .controllers
            .change_with_default(C::name(), ControllerMapping::new(C::name()), |m| {
                m.params.insert(name.to_string(), transformer);
            });
        self
    }

    fn with_injection<C: Component>(&mut self, binding: InjectionBinding) {
        self.metadata
            .injections
            .change_with_default(C::name(), InjectionMetadata::default(), |m| m.push(binding));
    }

    /// Fill `slot` on `C` with the singleton `T` during wiring.
    pub fn inject<C, T, F>(&mut self, property: &str, slot: F) -> &mut Self
    where
        C: Component,
        T: Component,
        F: Fn(&C) -> &Inject<T> + Send + Sync + 'static,
    {
        self.with_injection::<C>(InjectionBinding {
            owner: C::name().to_string(),
            property: property.to_string(),
            target: InjectionTarget::Component(T::name().to_string()),
            binder: component_binder::<C, T, F>(slot),
        });
        self
    }

    /// Fill `slot` on `C` with the repository for `entity`.
    pub fn inject_repository<C, F>(&mut self, property: &str, entity: &str, slot: F) -> &mut Self
    where
        C: Component,
        F: Fn(&C) -> &Inject<dyn Repository> + Send + Sync + 'static,
    {
        self.with_injection::<C>(InjectionBinding {
            owner: C::name().to_string(),
            property: property.to_string(),
            target: InjectionTarget::Repository(entity.to_string()),
            binder: repository_binder::<C, F>(slot),
        });
        self
    }

    /// Fill `slot` on `C` with the data source itself.
    pub fn inject_persistence<C, F>(&mut self, property: &str, slot: F) -> &mut Self
    where
        C: Component,
        F: Fn(&C) -> &Inject<dyn DataSource> + Send + Sync + 'static,
    {
        self.with_injection::<C>(InjectionBinding {
            owner: C::name().to_string(),
            property: property.to_string(),
            target: InjectionTarget::Persistence,
            binder: persistence_binder::<C, F>(slot),
        });
        self
    }

    /// Run `C::method` on `schedule`. Invalid schedules fail in every process;
    /// only the coordinator keeps the task.
    pub fn task<C, F>(
        &mut self,
        method: &str,
        schedule: impl Into<Schedule>,
        options: TaskOptions,
        run: F,
    ) -> Result<Option<String>, ConfigError>
    where
        C: Component,
        F: Fn(Arc<C>) -> Reply + Send + Sync + 'static,
    {
        let invoke: ErasedTask = Arc::new(move |instance: Instance| {
            let component = instance.downcast::<C>().map_err(|_| type_mismatch::<C>())?;
            Ok(run(component))
        });
        Ok(self
            .scheduler
            .register_erased(C::name(), method, schedule.into(), options, invoke)?)
    }

    /// Connect, wire, run `on_init` hooks and build the router. Triggers are
    /// not installed until the server starts.
    pub async fn build(self) -> Result<Server, AppError> {
        let Application {
            config,
            metadata,
            mut components,
            scheduler,
            data_source,
            verifier,
            middlewares,
            ..
        } = self;

        if let Some(ds) = &data_source {
            if !ds.is_initialized() {
                tracing::info!("connecting to database");
                ds.initialize().await?;
            }
        }
        components.wire_all(&metadata.injections, data_source.as_ref())?;
        components.init_all().await;

        let api = build_router(&metadata.controllers, &components, verifier)?;
        let router = compose(&config, api, data_source, &middlewares);
        Ok(Server {
            config,
            router,
            components: Arc::new(components),
            scheduler,
        })
    }

    /// `build`, then serve on the configured port until ctrl-c.
    pub async fn run(self) -> Result<(), AppError> {
        self.build().await?.serve().await
    }
}

fn compose(
    config: &ServerConfig,
    api: Router,
    data_source: Option<Arc<dyn DataSource>>,
    middlewares: &[Middleware],
) -> Router {
    let prefix = config.normalized_prefix();
    let mut app = common_routes(data_source);
    app = if prefix == "/" {
        app.merge(api)
    } else {
        app.nest(&prefix, api)
    };
    if let Some(dir) = &config.static_dir {
        let at = normalize_path(&config.static_path);
        app = if at == "/" {
            app.fallback_service(ServeDir::new(dir))
        } else {
            app.nest_service(&at, ServeDir::new(dir))
        };
    }
    for m in middlewares.iter().rev() {
        app = m.apply(app);
    }
    app.layer(RequestBodyLimitLayer::new(config.body_limit))
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
}

/// Registration helpers for one component type.
pub struct ControllerScope<'a, C: Component> {
    app: &'a mut Application,
    _component: PhantomData<fn() -> C>,
}

impl<'a, C: Component> ControllerScope<'a, C> {
    pub fn method<F>(&mut self, property: &str, options: MethodOptions, handler: F) -> &mut Self
    where
        F: Fn(Arc<C>, Args) -> Result<Reply, HttpError> + Send + Sync + 'static,
    {
        self.app.method::<C, F>(property, options, handler);
        self
    }

    pub fn param(&mut self, property: &str, binding: ParameterBinding) -> &mut Self {
        self.app.param::<C>(property, binding);
        self
    }

    pub fn path_variable<F, Fut>(&mut self, name: &str, property: &str, transform: F) -> &mut Self
    where
        F: Fn(Arc<C>, String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HttpError>> + Send + 'static,
    {
        self.app.path_variable::<C, F, Fut>(name, property, transform);
        self
    }

    pub fn inject<T, F>(&mut self, property: &str, slot: F) -> &mut Self
    where
        T: Component,
        F: Fn(&C) -> &Inject<T> + Send + Sync + 'static,
    {
        self.app.inject::<C, T, F>(property, slot);
        self
    }

    pub fn inject_repository<F>(&mut self, property: &str, entity: &str, slot: F) -> &mut Self
    where
        F: Fn(&C) -> &Inject<dyn Repository> + Send + Sync + 'static,
    {
        self.app.inject_repository::<C, F>(property, entity, slot);
        self
    }

    pub fn inject_persistence<F>(&mut self, property: &str, slot: F) -> &mut Self
    where
        F: Fn(&C) -> &Inject<dyn DataSource> + Send + Sync + 'static,
    {
        self.app.inject_persistence::<C, F>(property, slot);
        self
    }

    pub fn task<F>(
        &mut self,
        method: &str,
        schedule: impl Into<Schedule>,
        options: TaskOptions,
        run: F,
    ) -> Result<&mut Self, ConfigError>
    where
        F: Fn(Arc<C>) -> Reply + Send + Sync + 'static,
    {
        self.app.task::<C, F>(method, schedule, options, run)?;
        Ok(self)
    }
}

/// A built application: router ready, components wired and initialized.
pub struct Server {
    config: ServerConfig,
    router: Router,
    components: Arc<ComponentRegistry>,
    scheduler: TaskScheduler,
}

impl Server {
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Install cron triggers (coordinator only).
    pub fn activate_tasks(&mut self) -> usize {
        self.scheduler.activate_all(self.components.clone())
    }

    pub async fn serve(self) -> Result<(), AppError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }

    /// Activate tasks and serve on `listener` until ctrl-c.
    pub async fn serve_on(mut self, listener: TcpListener) -> Result<(), AppError> {
        let addr = listener.local_addr()?;
        self.activate_tasks();
        tracing::info!(%addr, prefix = %self.config.normalized_prefix(), "listening");
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(until_signal(tokio::signal::ctrl_c()))
            .await?;
        self.scheduler.shutdown();
        tracing::info!("server stopped");
        Ok(())
    }
}

/// Resolves when `signal` fires. A handler that cannot be installed keeps the
/// server running instead of stopping it right away.
async fn until_signal<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn failed_signal_handler_does_not_stop_the_server() {
        let broken = async { Err(std::io::Error::other("no signal handler")) };
        let waited = tokio::time::timeout(Duration::from_millis(50), until_signal(broken)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn delivered_signal_stops_the_server() {
        let waited = tokio::time::timeout(Duration::from_millis(50), until_signal(async { Ok(()) })).await;
        assert!(waited.is_ok());
    }
}
