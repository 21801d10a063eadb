//! Registration records gathered before startup and read once by the wiring
//! pass, the router builder and the scheduler.

pub mod injection;
pub mod mapping;
pub mod registry;

pub use injection::*;
pub use mapping::*;
pub use registry::*;

/// Controller and injection records, keyed by component name.
#[derive(Default)]
pub struct Metadata {
    pub controllers: MetadataRegistry<ControllerMapping>,
    pub injections: MetadataRegistry<InjectionMetadata>,
}
