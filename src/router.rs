//! Radix-tree route table.
//!
//! One [`matchit`] tree per HTTP method. O(path-length) lookup. The table is
//! filled at setup and only read while serving, so lookups take no locks.
//!
//! Tree values are indices into a flat leaf list. Re-registering the same
//! (method, path) swaps the leaf in place, which is how a later registration
//! replaces an earlier one without touching the tree.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::modifier::RouteKey;
use crate::pattern::{Params, Pattern};
use crate::route::Route;

struct Leaf {
    route: Arc<Route>,
    /// Set on the implicit `/prefix/` companion of `/prefix/{*name}`: the
    /// catch-all to bind to an empty string when this leaf matches.
    empty_catch_all: Option<String>,
}

impl Leaf {
    fn is_implicit(&self) -> bool {
        self.empty_catch_all.is_some()
    }
}

/// A successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Arc<Route>,
    pub params: Params,
}

/// The outcome of routing one request.
#[derive(Debug)]
pub enum Lookup<'a> {
    Found(RouteMatch<'a>),
    NotFound,
    /// The path matches under other methods, listed here in registration order.
    MethodNotAllowed(Vec<Method>),
}

/// The compiled set of routes.
#[derive(Default)]
pub struct RouteTable {
    trees: HashMap<Method, MatchitRouter<usize>>,
    /// Methods in first-registration order, for stable `Allow` lists.
    methods: Vec<Method>,
    leaves: Vec<Leaf>,
    slots: HashMap<RouteKey, usize>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `route.path()` into the tree of every method of `route`.
    ///
    /// A registration for an already registered (method, path) replaces it.
    pub fn register(&mut self, route: Route) -> Result<Arc<Route>, ConfigError> {
        if route.methods().is_empty() {
            return Err(ConfigError::NoMethods);
        }
        let pattern = Pattern::parse(route.path()).map_err(|source| ConfigError::InvalidPattern {
            pattern: route.path().to_owned(),
            source,
        })?;
        if let Some(target) = route.rewrite_target() {
            if let Err(e) = Pattern::parse(target) {
                warn!(path = route.path(), rewrite = target, error = %e, "rewrite target will fail at request time");
            }
        }

        let tree_path = pattern.to_route();
        let companion = pattern.empty_remainder_route();
        let route = Arc::new(route);

        for method in route.methods() {
            self.insert(
                method,
                &tree_path,
                Leaf { route: Arc::clone(&route), empty_catch_all: None },
            )?;
            if let (Some(path), Some(name)) = (&companion, pattern.catch_all()) {
                self.insert(
                    method,
                    path,
                    Leaf { route: Arc::clone(&route), empty_catch_all: Some(name.to_owned()) },
                )?;
            }
        }
        debug!(methods = ?route.methods(), path = route.path(), "route registered");
        Ok(route)
    }

    fn insert(&mut self, method: &Method, path: &str, leaf: Leaf) -> Result<(), ConfigError> {
        let key = RouteKey::new(method.clone(), path);
        if let Some(&slot) = self.slots.get(&key) {
            let prior = &self.leaves[slot];
            if leaf.is_implicit() && !prior.is_implicit() {
                return Ok(());
            }
            if !leaf.is_implicit() && !prior.is_implicit() {
                warn!(%method, path, "route registered twice, replacing the earlier registration");
            }
            self.leaves[slot] = leaf;
            return Ok(());
        }

        if !self.trees.contains_key(method) {
            self.methods.push(method.clone());
        }
        let slot = self.leaves.len();
        let tree = self.trees.entry(method.clone()).or_default();
        match tree.insert(path, slot) {
            Ok(()) => {
                self.leaves.push(leaf);
                self.slots.insert(key, slot);
                Ok(())
            }
            Err(e) if leaf.is_implicit() => {
                debug!(%method, path, error = %e, "empty catch-all companion not registered");
                Ok(())
            }
            Err(e) => Err(ConfigError::Conflict {
                pattern: leaf.route.path().to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    /// Routes `path` under `method`.
    pub fn lookup(&self, method: &Method, path: &str) -> Lookup<'_> {
        if let Some(found) = self.find(method, path) {
            return Lookup::Found(found);
        }
        let allowed: Vec<Method> = self
            .methods
            .iter()
            .filter(|m| *m != method)
            .filter(|m| self.find(m, path).is_some())
            .cloned()
            .collect();
        if allowed.is_empty() { Lookup::NotFound } else { Lookup::MethodNotAllowed(allowed) }
    }

    fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        let matched = self.trees.get(method)?.at(path).ok()?;
        let leaf = &self.leaves[*matched.value];
        let mut params: Params = matched.params.iter().collect();
        if let Some(name) = &leaf.empty_catch_all {
            params.push(name.as_str(), "");
        }
        Some(RouteMatch { route: &leaf.route, params })
    }

    /// Number of distinct (method, path) registrations, implicit companions excluded.
    pub fn len(&self) -> usize {
        self.leaves.iter().filter(|l| !l.is_implicit()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(routes: &[(&str, &str)]) -> RouteTable {
        let mut table = RouteTable::new();
        for (methods, path) in routes {
            table.register(Route::new(methods, *path).unwrap()).unwrap();
        }
        table
    }

    fn found<'a>(lookup: Lookup<'a>) -> RouteMatch<'a> {
        match lookup {
            Lookup::Found(m) => m,
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn literal_segments_win_over_parameters() {
        let table = table(&[("GET", "/users/{id}"), ("GET", "/users/me")]);
        let m = found(table.lookup(&Method::GET, "/users/me"));
        assert_eq!(m.route.path(), "/users/me");
        assert!(m.params.is_empty());

        let m = found(table.lookup(&Method::GET, "/users/42"));
        assert_eq!(m.route.path(), "/users/{id}");
        assert_eq!(m.params.get("id"), Some("42"));
    }

    #[test]
    fn parameters_do_not_match_empty_segments() {
        let table = table(&[("GET", "/users/:id")]);
        assert!(matches!(table.lookup(&Method::GET, "/users/"), Lookup::NotFound));
    }

    #[test]
    fn wildcard_under_prefix_captures_the_remainder() {
        let table = table(&[("GET", "/static/{*path}")]);
        let m = found(table.lookup(&Method::GET, "/static/a/b.png"));
        assert_eq!(m.params.get("path"), Some("a/b.png"));
    }

    #[test]
    fn wildcard_matches_an_empty_remainder() {
        let table = table(&[("GET", "/static/*path")]);
        let m = found(table.lookup(&Method::GET, "/static/"));
        assert_eq!(m.route.path(), "/static/*path");
        assert_eq!(m.params.get("path"), Some(""));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn explicit_route_beats_the_implicit_companion() {
        let table = table(&[("GET", "/{*path}"), ("GET", "/")]);
        let m = found(table.lookup(&Method::GET, "/"));
        assert_eq!(m.route.path(), "/");
        assert!(m.params.is_empty());

        let table = self::table(&[("GET", "/"), ("GET", "/{*path}")]);
        assert_eq!(found(table.lookup(&Method::GET, "/")).route.path(), "/");
    }

    #[test]
    fn other_methods_yield_method_not_allowed() {
        let table = table(&[("POST|PUT", "/items")]);
        match table.lookup(&Method::GET, "/items") {
            Lookup::MethodNotAllowed(allowed) => assert_eq!(allowed, vec![Method::POST, Method::PUT]),
            other => panic!("expected 405, got {other:?}"),
        }
        assert!(matches!(table.lookup(&Method::GET, "/nothing"), Lookup::NotFound));
    }

    #[test]
    fn duplicate_registration_replaces_the_route() {
        let mut table = RouteTable::new();
        table.register(Route::new("GET", "/items").unwrap()).unwrap();
        table
            .register(Route::new("GET", "/items").unwrap().rewrite_to("/v2/items"))
            .unwrap();
        assert_eq!(table.len(), 1);
        let m = found(table.lookup(&Method::GET, "/items"));
        assert_eq!(m.route.rewrite_target(), Some("/v2/items"));
    }

    #[test]
    fn invalid_patterns_are_configuration_errors() {
        let mut table = RouteTable::new();
        let err = table.register(Route::new("GET", "/a/{*rest}/b").unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));

        let err = table.register(Route::new("GET", "no-slash").unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn conflicting_parameter_names_are_rejected() {
        let mut table = RouteTable::new();
        table.register(Route::new("GET", "/users/{id}").unwrap()).unwrap();
        let err = table.register(Route::new("GET", "/users/{name}").unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Conflict { .. }));
    }
}
