//! The route model.

use std::fmt;
use std::sync::Arc;

use http::{HeaderMap, Method, Response};

use crate::error::{BoxError, ConfigError};
use crate::method;
use crate::response::Body;

/// A callback run on the upstream response before it is relayed.
///
/// Returning `Err` aborts the modifier chain; the error reaches the error
/// handler as [`ProxyError::Modifier`](crate::ProxyError::Modifier).
pub type ResponseModifier =
    Arc<dyn Fn(&mut Response<Body>) -> Result<(), BoxError> + Send + Sync + 'static>;

/// A binding of methods and a path pattern, with optional rewrite target,
/// request headers and response modifier.
///
/// ```rust
/// use revmux::Route;
///
/// let route = Route::new("GET|POST", "/items/{id}")?
///     .rewrite_to("/api/items/{id}");
/// assert_eq!(route.methods().len(), 2);
/// # Ok::<(), revmux::ConfigError>(())
/// ```
#[derive(Clone)]
pub struct Route {
    methods: Vec<Method>,
    path: String,
    rewrite: Option<String>,
    request_headers: HeaderMap,
    modifier: Option<ResponseModifier>,
}

impl Route {
    /// A route for the methods named by `methods` (see [`method::parse`]).
    pub fn new(methods: &str, path: impl Into<String>) -> Result<Self, ConfigError> {
        Self::with_methods(method::parse(methods)?, path)
    }

    pub fn with_methods(methods: Vec<Method>, path: impl Into<String>) -> Result<Self, ConfigError> {
        if methods.is_empty() {
            return Err(ConfigError::NoMethods);
        }
        Ok(Self {
            methods,
            path: path.into(),
            rewrite: None,
            request_headers: HeaderMap::new(),
            modifier: None,
        })
    }

    /// Forward matched requests to `target` instead of the request path.
    /// An empty target means no rewrite.
    pub fn rewrite_to(mut self, target: impl Into<String>) -> Self {
        let target = target.into();
        self.rewrite = (!target.is_empty()).then_some(target);
        self
    }

    /// Headers set on every request forwarded through this route, overriding
    /// the proxy-wide ones.
    pub fn request_headers(mut self, headers: HeaderMap) -> Self {
        self.request_headers = headers;
        self
    }

    pub fn modify_response<F>(mut self, modifier: F) -> Self
    where
        F: Fn(&mut Response<Body>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.modifier = Some(Arc::new(modifier));
        self
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn rewrite_target(&self) -> Option<&str> {
        self.rewrite.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    pub fn modifier(&self) -> Option<&ResponseModifier> {
        self.modifier.as_ref()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("methods", &self.methods)
            .field("path", &self.path)
            .field("rewrite", &self.rewrite)
            .field("request_headers", &self.request_headers)
            .field("modifier", &self.modifier.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn new_expands_the_method_spec() {
        let route = Route::new("*", "/test").unwrap();
        assert_eq!(route.methods(), &method::ANY);
        assert_eq!(route.path(), "/test");
        assert_eq!(route.rewrite_target(), None);
        assert!(route.headers().is_empty());
        assert!(route.modifier().is_none());
    }

    #[test]
    fn empty_method_list_is_rejected() {
        assert!(matches!(Route::with_methods(Vec::new(), "/"), Err(ConfigError::NoMethods)));
    }

    #[test]
    fn empty_rewrite_target_means_no_rewrite() {
        let route = Route::new("GET", "/a").unwrap().rewrite_to("/b");
        assert_eq!(route.rewrite_target(), Some("/b"));
        assert_eq!(route.rewrite_to("").rewrite_target(), None);
    }

    #[test]
    fn request_headers_are_kept() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("accept", HeaderValue::from_static("application/json"));
        let route = Route::new("GET", "/").unwrap().request_headers(headers.clone());
        assert_eq!(route.headers(), &headers);
    }

    #[test]
    fn modifier_is_callable() {
        let route = Route::new("GET", "/").unwrap().modify_response(|res| {
            res.headers_mut().insert("x-test", HeaderValue::from_static("modified"));
            Ok(())
        });
        let mut res = Response::new(crate::response::empty());
        (route.modifier().unwrap())(&mut res).unwrap();
        assert_eq!(res.headers()["x-test"], "modified");
    }
}
