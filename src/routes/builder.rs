//! Builds the API router from controller mappings.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use axum::routing::MethodRouter;
use axum::Router;

use crate::auth::{auth_gate, TokenVerifier};
use crate::config::normalize_path;
use crate::container::ComponentRegistry;
use crate::dispatch::RouteHandler;
use crate::error::ConfigError;
use crate::metadata::{ControllerMapping, EffectiveOptions, MetadataRegistry, RequestMethod};

fn conflicts(existing: &[RequestMethod], method: RequestMethod) -> bool {
    existing
        .iter()
        .any(|m| *m == method || *m == RequestMethod::All || method == RequestMethod::All)
}

fn join(base: &str, path: &str) -> String {
    match (base, path) {
        ("/", p) => p.to_string(),
        (b, "/") => b.to_string(),
        (b, p) => format!("{}{}", b, p),
    }
}

fn duplicate(method: RequestMethod, path: &str) -> ConfigError {
    ConfigError::DuplicateRoute {
        method: method.as_str().to_string(),
        path: path.to_string(),
    }
}

/// One controller's routes, before mounting.
struct Mounted {
    router: Router,
    methods: BTreeMap<String, Vec<RequestMethod>>,
}

fn controller_router(
    mapping: &ControllerMapping,
    components: &ComponentRegistry,
    verifier: Option<&Arc<dyn TokenVerifier>>,
) -> Result<Mounted, ConfigError> {
    let name = mapping.component.as_str();
    let options = mapping
        .options
        .as_ref()
        .ok_or_else(|| ConfigError::MissingComponent(name.to_string()))?;
    let instance = components.resolve_by_name(name)?;
    let transformers = Arc::new(mapping.params.clone());

    let mut properties: Vec<&String> = mapping.mappings.keys().collect();
    properties.sort();

    let mut routes: BTreeMap<String, (MethodRouter, Vec<RequestMethod>)> = BTreeMap::new();
    for property in properties {
        let method_mapping = &mapping.mappings[property];
        let handler = method_mapping.handler.clone().ok_or_else(|| ConfigError::MissingHandler {
            component: name.to_string(),
            method: property.clone(),
        })?;

        let parameters = method_mapping.sorted_parameters();
        let mut seen = HashSet::new();
        for p in &parameters {
            if !seen.insert(p.index) {
                return Err(ConfigError::DuplicateParameter {
                    component: name.to_string(),
                    method: property.clone(),
                    index: p.index,
                });
            }
        }

        let effective = EffectiveOptions::merge(options, &method_mapping.options);
        let path = normalize_path(&effective.path);
        let route = Arc::new(RouteHandler {
            component: name.to_string(),
            method: property.clone(),
            instance: instance.clone(),
            handler,
            parameters,
            transformers: transformers.clone(),
            error_code: effective.error_code,
            response: effective.response,
        });
        let mut method_router = route.into_method_router(effective.method);
        for m in effective.middlewares.iter().rev() {
            method_router = m.apply_method(method_router);
        }

        match routes.remove(&path) {
            Some((existing, mut methods)) => {
                if conflicts(&methods, effective.method) {
                    return Err(duplicate(effective.method, &path));
                }
                methods.push(effective.method);
                routes.insert(path, (existing.merge(method_router), methods));
            }
            None => {
                routes.insert(path, (method_router, vec![effective.method]));
            }
        }
        tracing::debug!(controller = name, method = %property, verb = effective.method.as_str(), "mapped");
    }

    let mut router = Router::new();
    let mut methods = BTreeMap::new();
    for (path, (method_router, verbs)) in routes {
        router = router.route(&path, method_router);
        methods.insert(path, verbs);
    }
    // First listed runs first, so it is layered last.
    for m in options.middlewares.iter().rev() {
        router = m.apply(router);
    }
    if options.authenticated {
        let verifier = verifier.ok_or_else(|| ConfigError::MissingVerifier(name.to_string()))?;
        router = router.layer(axum::middleware::from_fn_with_state(verifier.clone(), auth_gate));
    }
    Ok(Mounted { router, methods })
}

/// Mount every registered controller at each of its base paths.
pub fn build_router(
    controllers: &MetadataRegistry<ControllerMapping>,
    components: &ComponentRegistry,
    verifier: Option<Arc<dyn TokenVerifier>>,
) -> Result<Router, ConfigError> {
    let mut names: Vec<&String> = controllers.keys().collect();
    names.sort();

    let mut api = Router::new();
    let mut bases = HashSet::new();
    let mut mounted: HashMap<String, Vec<RequestMethod>> = HashMap::new();

    for name in names {
        let Some(mapping) = controllers.get(name) else {
            continue;
        };
        let controller = controller_router(mapping, components, verifier.as_ref())?;
        let paths = mapping.options.as_ref().map(|o| o.paths.clone()).unwrap_or_default();
        for base in paths.iter().map(|p| normalize_path(p)) {
            if !bases.insert(base.clone()) {
                return Err(ConfigError::DuplicateBasePath(base));
            }
            for (path, verbs) in &controller.methods {
                let full = join(&base, path);
                let existing = mounted.entry(full.clone()).or_default();
                for verb in verbs {
                    if conflicts(existing, *verb) {
                        return Err(duplicate(*verb, &full));
                    }
                    existing.push(*verb);
                }
            }
            api = if base == "/" {
                api.merge(controller.router.clone())
            } else {
                api.nest(&base, controller.router.clone())
            };
            tracing::info!(controller = %name, base = %base, routes = controller.methods.len(), "mounted controller");
        }
    }
    Ok(api)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_conflicts_with_everything() {
        assert!(conflicts(&[RequestMethod::Get], RequestMethod::Get));
        assert!(conflicts(&[RequestMethod::Get], RequestMethod::All));
        assert!(conflicts(&[RequestMethod::All], RequestMethod::Post));
        assert!(!conflicts(&[RequestMethod::Get], RequestMethod::Post));
    }

    #[test]
    fn joins_base_and_method_paths() {
        assert_eq!(join("/", "/x"), "/x");
        assert_eq!(join("/c", "/"), "/c");
        assert_eq!(join("/c", "/:id"), "/c/:id");
        assert_eq!(join("/", "/"), "/");
    }
}
