//! Component registry: one instance per name, wired once after registration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::container::{Component, Injected, Instance};
use crate::data::DataSource;
use crate::error::ConfigError;
use crate::metadata::{InjectionMetadata, InjectionTarget, MetadataRegistry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    /// Declared by a registration record, no instance yet.
    Unconstructed,
    Constructed,
    Wired,
    Initialized,
}

#[derive(Clone, Debug)]
pub struct ComponentDescriptor {
    pub name: String,
    pub lifecycle: Lifecycle,
}

struct ComponentEntry {
    descriptor: ComponentDescriptor,
    instance: Option<Instance>,
    hooks: Option<Arc<dyn Component>>,
}

#[derive(Default)]
pub struct ComponentRegistry {
    /// Registration order; drives `init_all`.
    order: Vec<String>,
    entries: HashMap<String, ComponentEntry>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` exists before its instance does.
    pub fn declare(&mut self, name: &str) {
        if self.entries.contains_key(name) {
            return;
        }
        self.order.push(name.to_string());
        self.entries.insert(
            name.to_string(),
            ComponentEntry {
                descriptor: ComponentDescriptor {
                    name: name.to_string(),
                    lifecycle: Lifecycle::Unconstructed,
                },
                instance: None,
                hooks: None,
            },
        );
    }

    /// Construct `C` with `make` unless an instance already exists; returns the
    /// singleton either way. `make` must not touch other components.
    pub fn register_with<C, F>(&mut self, make: F) -> Result<Arc<C>, ConfigError>
    where
        C: Component,
        F: FnOnce() -> C,
    {
        let name = C::name();
        self.declare(name);
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| ConfigError::MissingComponent(name.to_string()))?;
        if let Some(existing) = &entry.instance {
            return existing
                .clone()
                .downcast::<C>()
                .map_err(|_| ConfigError::TypeMismatch(name.to_string()));
        }
        let instance = Arc::new(make());
        entry.instance = Some(instance.clone() as Instance);
        entry.hooks = Some(instance.clone() as Arc<dyn Component>);
        entry.descriptor.lifecycle = Lifecycle::Constructed;
        tracing::debug!(component = name, "registered component");
        Ok(instance)
    }

    pub fn register<C: Component + Default>(&mut self) -> Result<Arc<C>, ConfigError> {
        self.register_with(C::default)
    }

    pub fn resolve<C: Component>(&self) -> Result<Arc<C>, ConfigError> {
        self.resolve_by_name(C::name())?
            .downcast::<C>()
            .map_err(|_| ConfigError::TypeMismatch(C::name().to_string()))
    }

    pub fn resolve_by_name(&self, name: &str) -> Result<Instance, ConfigError> {
        self.entries
            .get(name)
            .and_then(|e| e.instance.clone())
            .ok_or_else(|| ConfigError::MissingComponent(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.get(name).map(|e| e.instance.is_some()).unwrap_or(false)
    }

    pub fn descriptor(&self, name: &str) -> Option<&ComponentDescriptor> {
        self.entries.get(name).map(|e| &e.descriptor)
    }

    /// Names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bind every declared injection. Any unresolved target aborts the pass.
    pub fn wire_all(
        &mut self,
        injections: &MetadataRegistry<InjectionMetadata>,
        data: Option<&Arc<dyn DataSource>>,
    ) -> Result<(), ConfigError> {
        for (owner, meta) in injections.iter() {
            if !self.contains(owner) && !meta.injections.is_empty() {
                return Err(ConfigError::MissingComponent(owner.clone()));
            }
        }

        for name in &self.order {
            let Some(instance) = self.entries.get(name).and_then(|e| e.instance.clone()) else {
                continue;
            };
            let Some(meta) = injections.get(name) else {
                continue;
            };
            for binding in &meta.injections {
                let injected = match &binding.target {
                    InjectionTarget::Component(target) => Injected::Component(self.resolve_by_name(target)?),
                    InjectionTarget::Repository(entity) => {
                        let ds = data.ok_or_else(|| ConfigError::MissingDataSource {
                            owner: binding.owner.clone(),
                            property: binding.property.clone(),
                        })?;
                        Injected::Repository(ds.repository(entity))
                    }
                    InjectionTarget::Persistence => {
                        let ds = data.ok_or_else(|| ConfigError::MissingDataSource {
                            owner: binding.owner.clone(),
                            property: binding.property.clone(),
                        })?;
                        Injected::Persistence(ds.clone())
                    }
                };
                (binding.binder)(&instance, injected)?;
                tracing::debug!(owner = %name, property = %binding.property, target = ?binding.target, "bound");
            }
        }

        for entry in self.entries.values_mut() {
            if entry.instance.is_some() && entry.descriptor.lifecycle < Lifecycle::Wired {
                entry.descriptor.lifecycle = Lifecycle::Wired;
            }
        }
        Ok(())
    }

    /// Run every `on_init` hook in registration order. A failing hook is
    /// logged and does not stop the others.
    pub async fn init_all(&mut self) {
        let hooks: Vec<(String, Arc<dyn Component>)> = self
            .order
            .iter()
            .filter_map(|name| {
                self.entries
                    .get(name)
                    .and_then(|e| e.hooks.clone())
                    .map(|h| (name.clone(), h))
            })
            .collect();
        for (name, hook) in hooks {
            if let Err(e) = hook.on_init().await {
                tracing::warn!(component = %name, error = %e, "on_init failed");
            }
            if let Some(entry) = self.entries.get_mut(&name) {
                entry.descriptor.lifecycle = Lifecycle::Initialized;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{component_binder, persistence_binder, repository_binder, BoxError, Inject};
    use crate::data::{MemoryDataSource, Repository};
    use crate::metadata::InjectionBinding;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Ledger {
        inits: AtomicUsize,
    }

    #[async_trait]
    impl Component for Ledger {
        fn name() -> &'static str {
            "Ledger"
        }

        async fn on_init(&self) -> Result<(), BoxError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Accounts {
        ledger: Inject<Ledger>,
        repo: Inject<dyn Repository>,
        ds: Inject<dyn DataSource>,
    }

    #[async_trait]
    impl Component for Accounts {
        fn name() -> &'static str {
            "Accounts"
        }

        async fn on_init(&self) -> Result<(), BoxError> {
            Err("seed failed".into())
        }
    }

    fn bindings() -> MetadataRegistry<InjectionMetadata> {
        let mut reg = MetadataRegistry::new();
        reg.change_with_default("Accounts", InjectionMetadata::default(), |m| {
            m.push(InjectionBinding {
                owner: "Accounts".into(),
                property: "ledger".into(),
                target: InjectionTarget::Component("Ledger".into()),
                binder: component_binder::<Accounts, Ledger, _>(|a: &Accounts| &a.ledger),
            });
            m.push(InjectionBinding {
                owner: "Accounts".into(),
                property: "repo".into(),
                target: InjectionTarget::Repository("Account".into()),
                binder: repository_binder::<Accounts, _>(|a: &Accounts| &a.repo),
            });
            m.push(InjectionBinding {
                owner: "Accounts".into(),
                property: "ds".into(),
                target: InjectionTarget::Persistence,
                binder: persistence_binder::<Accounts, _>(|a: &Accounts| &a.ds),
            });
        });
        reg
    }

    #[test]
    fn registering_twice_keeps_one_instance() {
        let mut reg = ComponentRegistry::new();
        let a = reg.register::<Ledger>().unwrap();
        let b = reg.register_with(|| Ledger {
            inits: AtomicUsize::new(5),
        })
        .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.inits.load(Ordering::SeqCst), 0);
        assert_eq!(reg.len(), 1);
        assert!(Arc::ptr_eq(&a, &reg.resolve::<Ledger>().unwrap()));
    }

    #[test]
    fn resolve_missing_fails() {
        let reg = ComponentRegistry::new();
        assert!(matches!(
            reg.resolve_by_name("Nope"),
            Err(ConfigError::MissingComponent(n)) if n == "Nope"
        ));
    }

    #[tokio::test]
    async fn wiring_binds_all_kinds_regardless_of_order() {
        let mut reg = ComponentRegistry::new();
        // Owner registered before its dependency.
        let accounts = reg.register::<Accounts>().unwrap();
        let ledger = reg.register::<Ledger>().unwrap();
        let ds: Arc<dyn DataSource> = Arc::new(MemoryDataSource::new());

        reg.wire_all(&bindings(), Some(&ds)).unwrap();
        assert!(Arc::ptr_eq(&accounts.ledger.get().unwrap(), &ledger));
        assert_eq!(accounts.repo.get().unwrap().entity(), "Account");
        assert!(accounts.ds.is_bound());
        assert_eq!(reg.descriptor("Accounts").unwrap().lifecycle, Lifecycle::Wired);

        // Replaying the pass is harmless.
        reg.wire_all(&bindings(), Some(&ds)).unwrap();
        assert!(Arc::ptr_eq(&accounts.ledger.get().unwrap(), &ledger));

        reg.init_all().await;
        assert_eq!(ledger.inits.load(Ordering::SeqCst), 1);
        assert_eq!(reg.descriptor("Accounts").unwrap().lifecycle, Lifecycle::Initialized);
        assert_eq!(reg.descriptor("Ledger").unwrap().lifecycle, Lifecycle::Initialized);
    }

    #[test]
    fn missing_dependency_is_fatal() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Accounts>().unwrap();
        let ds: Arc<dyn DataSource> = Arc::new(MemoryDataSource::new());
        let err = reg.wire_all(&bindings(), Some(&ds)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingComponent(n) if n == "Ledger"));
    }

    #[test]
    fn repository_binding_needs_a_data_source() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Accounts>().unwrap();
        reg.register::<Ledger>().unwrap();
        let err = reg.wire_all(&bindings(), None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDataSource { .. }));
    }

    #[test]
    fn declared_components_start_unconstructed() {
        let mut reg = ComponentRegistry::new();
        reg.declare("Ledger");
        assert_eq!(reg.descriptor("Ledger").unwrap().lifecycle, Lifecycle::Unconstructed);
        assert!(!reg.contains("Ledger"));
        reg.register::<Ledger>().unwrap();
        assert_eq!(reg.descriptor("Ledger").unwrap().lifecycle, Lifecycle::Constructed);
    }
}
