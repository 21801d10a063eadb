//! Per-request dispatch: path-variable transforms, argument assembly,
//! handler invocation and reply adaptation.

mod args;
mod reply;
mod route;

pub use args::Args;
pub use reply::{Output, Reply};
pub(crate) use route::RouteHandler;
