//! Switchboard SDK: registration-driven HTTP server core. Components are
//! registered with their routes, parameter bindings, injections and cron
//! tasks; startup wires them once and builds an axum router.

pub mod app;
pub mod auth;
pub mod config;
pub mod container;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod metadata;
pub mod response;
pub mod routes;
pub mod schedule;

pub use app::{Application, ControllerScope, Server};
pub use auth::{Claims, JwtVerifier, TokenVerifier};
pub use config::ServerConfig;
pub use container::{BoxError, Component, ComponentRegistry, Inject};
pub use data::{DataSource, MemoryDataSource, PgDataSource, Repository};
pub use dispatch::{Args, Output, Reply};
pub use error::{AppError, ConfigError, HttpError};
pub use metadata::{
    ControllerOptions, MethodOptions, Middleware, ParamKind, ParameterBinding, RequestMethod, ResponseKind,
};
pub use response::{failure, success, Message};
pub use schedule::{CronField, CronSyntax, ProcessRole, Schedule, TaskOptions, TaskScheduler};
