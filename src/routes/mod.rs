mod builder;
mod common;

pub use builder::build_router;
pub use common::common_routes;
