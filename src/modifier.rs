//! Route-scoped response modifiers and the modifier chain.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, Response};

use crate::error::{BoxError, ProxyError};
use crate::response::Body;
use crate::route::ResponseModifier;

/// A (method, registered path) pair identifying one route registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub method: Method,
    pub path: String,
}

impl RouteKey {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into() }
    }
}

/// Modifiers keyed by the route registration they belong to.
///
/// Built at setup and read-only while serving.
#[derive(Clone, Default)]
pub struct ModifierIndex {
    modifiers: HashMap<RouteKey, ResponseModifier>,
}

impl ModifierIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `modifier` to `key`, or clears the binding when `None`.
    pub fn set(&mut self, key: RouteKey, modifier: Option<ResponseModifier>) {
        match modifier {
            Some(m) => {
                self.modifiers.insert(key, m);
            }
            None => {
                self.modifiers.remove(&key);
            }
        }
    }

    pub fn get(&self, method: &Method, path: &str) -> Option<&ResponseModifier> {
        self.modifiers.get(&RouteKey::new(method.clone(), path))
    }

    pub fn len(&self) -> usize {
        self.modifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }
}

/// Wraps a closure as a [`ResponseModifier`].
pub fn from_fn<F>(f: F) -> ResponseModifier
where
    F: Fn(&mut Response<Body>) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Runs `chain` in order over `res`. The first failure stops the chain.
pub fn apply(chain: &[Option<&ResponseModifier>], res: &mut Response<Body>) -> Result<(), ProxyError> {
    for modifier in chain.iter().flatten() {
        modifier(res).map_err(ProxyError::Modifier)?;
    }
    Ok(())
}
