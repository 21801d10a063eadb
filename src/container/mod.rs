//! Singleton component registry and the one-time wiring pass.

pub mod inject;
pub mod registry;

pub use inject::*;
pub use registry::*;

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

/// Type-erased singleton.
pub type Instance = Arc<dyn Any + Send + Sync>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Anything held as a singleton: controllers, helpers, cron jobs.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Stable registry key. Must be unique across the application.
    fn name() -> &'static str
    where
        Self: Sized;

    /// Runs once after every component is wired, in registration order.
    async fn on_init(&self) -> Result<(), BoxError> {
        Ok(())
    }
}
