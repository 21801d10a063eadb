//! Injection descriptors: which property of a component is bound to what.

use std::sync::Arc;

use crate::container::{Injected, Instance};
use crate::error::ConfigError;

pub(crate) type ErasedBinder = Arc<dyn Fn(&Instance, Injected) -> Result<(), ConfigError> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InjectionTarget {
    /// Sibling component by registry name.
    Component(String),
    /// Repository handle for an entity name.
    Repository(String),
    /// The underlying data source itself.
    Persistence,
}

#[derive(Clone)]
pub struct InjectionBinding {
    pub owner: String,
    pub property: String,
    pub target: InjectionTarget,
    pub(crate) binder: ErasedBinder,
}

impl std::fmt::Debug for InjectionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectionBinding")
            .field("owner", &self.owner)
            .field("property", &self.property)
            .field("target", &self.target)
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct InjectionMetadata {
    pub injections: Vec<InjectionBinding>,
}

impl InjectionMetadata {
    /// Add a binding, replacing an earlier one for the same property.
    pub fn push(&mut self, binding: InjectionBinding) {
        self.injections.retain(|b| b.property != binding.property);
        self.injections.push(binding);
    }
}
