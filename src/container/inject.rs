//! Injection slots held by components and the typed binders that fill them.

use std::sync::{Arc, RwLock};

use crate::container::{Component, Instance};
use crate::data::{DataSource, Repository};
use crate::error::{AppError, ConfigError};
use crate::metadata::ErasedBinder;

/// Resolved value for one binding.
pub enum Injected {
    Component(Instance),
    Repository(Arc<dyn Repository>),
    Persistence(Arc<dyn DataSource>),
}

impl Injected {
    fn kind(&self) -> &'static str {
        match self {
            Injected::Component(_) => "component",
            Injected::Repository(_) => "repository",
            Injected::Persistence(_) => "persistence",
        }
    }
}

/// A property filled by the wiring pass. Binding again replaces the value,
/// so replaying the pass is harmless.
pub struct Inject<T: ?Sized> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Default for Inject<T> {
    fn default() -> Self {
        Inject {
            slot: RwLock::new(None),
        }
    }
}

impl<T: ?Sized> Inject<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, value: Arc<T>) {
        let mut guard = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(value);
    }

    pub fn is_bound(&self) -> bool {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn get(&self) -> Result<Arc<T>, AppError> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| AppError::NotWired(std::any::type_name::<T>().to_string()))
    }
}

fn owner_of<C: Component>(owner: &Instance) -> Result<Arc<C>, ConfigError> {
    owner
        .clone()
        .downcast::<C>()
        .map_err(|_| ConfigError::TypeMismatch(C::name().to_string()))
}

fn unexpected(owner: &str, got: &Injected) -> ConfigError {
    ConfigError::TypeMismatch(format!("{} (unexpected {} binding)", owner, got.kind()))
}

pub(crate) fn component_binder<C, T, F>(slot: F) -> ErasedBinder
where
    C: Component,
    T: Component,
    F: Fn(&C) -> &Inject<T> + Send + Sync + 'static,
{
    Arc::new(move |owner: &Instance, injected: Injected| -> Result<(), ConfigError> {
        let owner = owner_of::<C>(owner)?;
        match injected {
            Injected::Component(dep) => {
                let dep = dep
                    .downcast::<T>()
                    .map_err(|_| ConfigError::TypeMismatch(T::name().to_string()))?;
                slot(owner.as_ref()).bind(dep);
                Ok(())
            }
            other => Err(unexpected(C::name(), &other)),
        }
    })
}

pub(crate) fn repository_binder<C, F>(slot: F) -> ErasedBinder
where
    C: Component,
    F: Fn(&C) -> &Inject<dyn Repository> + Send + Sync + 'static,
{
    Arc::new(move |owner: &Instance, injected: Injected| -> Result<(), ConfigError> {
        let owner = owner_of::<C>(owner)?;
        match injected {
            Injected::Repository(repo) => {
                slot(owner.as_ref()).bind(repo);
                Ok(())
            }
            other => Err(unexpected(C::name(), &other)),
        }
    })
}

pub(crate) fn persistence_binder<C, F>(slot: F) -> ErasedBinder
where
    C: Component,
    F: Fn(&C) -> &Inject<dyn DataSource> + Send + Sync + 'static,
{
    Arc::new(move |owner: &Instance, injected: Injected| -> Result<(), ConfigError> {
        let owner = owner_of::<C>(owner)?;
        match injected {
            Injected::Persistence(ds) => {
                slot(owner.as_ref()).bind(ds);
                Ok(())
            }
            other => Err(unexpected(C::name(), &other)),
        }
    })
}
