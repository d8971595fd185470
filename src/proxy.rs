//! The reverse-proxy dispatcher.
//!
//! # Per-request flow
//!
//! ```text
//! Received ─▶ Matched ─▶ HeadersPrepared ─▶ Rewritten ─▶ Forwarded ─▶ ModifiersApplied ─▶ Sent
//!               │              └──────────────┴─────────────┴──────────────┴──▶ Errored (error handler)
//!               ├──▶ NotFound          (not-found handler)
//!               └──▶ MethodNotAllowed  (method-not-allowed handler)
//! ```
//!
//! Every request holds one unit of load from entry until its response body
//! has been read to the end or dropped. Failures after matching, and any
//! panic inside dispatch, end up in the error handler; the serving loop never
//! sees them.
//!
//! # Setup versus serving
//!
//! Everything a request reads is assembled by [`ProxyBuilder`] and frozen by
//! [`ProxyBuilder::build`]. The only state that changes while serving is the
//! load counter and the health monitor, both of which synchronize internally.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use http::header::{self, HeaderMap, HeaderValue};
use http::request::Parts;
use http::{Method, Request, Response, StatusCode, Version};
use tracing::{debug, error, warn};

use crate::error::{BoxError, ConfigError, ProxyError, RewriteError};
use crate::headers::{self, X_FORWARDED_HOST, X_FORWARDED_PROTO};
use crate::health::{self, HealthMonitor, Probe, TcpProbe};
use crate::load::{self, LoadCounter};
use crate::modifier::{self, ModifierIndex, RouteKey};
use crate::origin::Origin;
use crate::pattern;
use crate::response::{self, Body};
use crate::route::{ResponseModifier, Route};
use crate::router::{Lookup, RouteTable};
use crate::transport::{HyperTransport, Transport};

// ── Hooks ─────────────────────────────────────────────────────────────────────

/// Turns a per-request failure into the response sent to the client.
pub type ErrorHandler = Arc<dyn Fn(&Parts, ProxyError) -> Response<Body> + Send + Sync + 'static>;

/// Answers a request no route matched.
pub type NotFoundHandler = Arc<dyn Fn(&Parts) -> Response<Body> + Send + Sync + 'static>;

/// Answers a request whose path is routed only under other methods.
pub type MethodNotAllowedHandler =
    Arc<dyn Fn(&Parts, &[Method]) -> Response<Body> + Send + Sync + 'static>;

/// The client's socket address, inserted into request extensions by the
/// server. When present, it is appended to `X-Forwarded-For`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

fn default_error_handler(parts: &Parts, err: ProxyError) -> Response<Body> {
    warn!(method = %parts.method, uri = %parts.uri, error = %err, "proxy error");
    response::status(err.status())
}

fn default_not_found(_parts: &Parts) -> Response<Body> {
    response::status(StatusCode::NOT_FOUND)
}

fn default_method_not_allowed(_parts: &Parts, allowed: &[Method]) -> Response<Body> {
    let mut res = response::status(StatusCode::METHOD_NOT_ALLOWED);
    let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
    if let Ok(value) = HeaderValue::from_str(&allow) {
        res.headers_mut().insert(header::ALLOW, value);
    }
    res
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Collects routes and proxy-wide settings.
///
/// Route registration validates eagerly; the first invalid route is returned
/// to the caller and the builder is consumed.
///
/// ```rust,no_run
/// use revmux::ProxyBuilder;
///
/// # async fn run() -> Result<(), revmux::Error> {
/// let proxy = ProxyBuilder::new("http://backend:8000")?
///     .rewrite_path("GET|POST", "/items", "/api/items")?
///     .pass_any_path_under("GET", ["/static"])?
///     .build()
///     .await;
/// # Ok(()) }
/// ```
pub struct ProxyBuilder {
    origin: Origin,
    routes: RouteTable,
    modifiers: ModifierIndex,
    request_headers: HeaderMap,
    modify_response: Option<ResponseModifier>,
    error_handler: ErrorHandler,
    not_found: NotFoundHandler,
    method_not_allowed: MethodNotAllowedHandler,
    transport: Option<Arc<dyn Transport>>,
    probe: Arc<dyn Probe>,
    period: Duration,
}

impl ProxyBuilder {
    /// Starts a builder for `origin`, e.g. `http://backend:8000`.
    pub fn new(origin: &str) -> Result<Self, ConfigError> {
        Ok(Self::with_origin(origin.parse()?))
    }

    pub fn with_origin(origin: Origin) -> Self {
        Self {
            origin,
            routes: RouteTable::new(),
            modifiers: ModifierIndex::new(),
            request_headers: HeaderMap::new(),
            modify_response: None,
            error_handler: Arc::new(default_error_handler),
            not_found: Arc::new(default_not_found),
            method_not_allowed: Arc::new(default_method_not_allowed),
            transport: None,
            probe: Arc::new(TcpProbe::default()),
            period: health::DEFAULT_PERIOD,
        }
    }

    /// Registers `route` under each of its methods.
    pub fn route(mut self, route: Route) -> Result<Self, ConfigError> {
        let route = self.routes.register(route)?;
        for method in route.methods() {
            self.modifiers
                .set(RouteKey::new(method.clone(), route.path()), route.modifier().cloned());
        }
        Ok(self)
    }

    /// Forwards `path` as-is for `methods` (`"GET"`, `"GET|POST"`, `"*"`).
    pub fn pass_path(self, methods: &str, path: &str) -> Result<Self, ConfigError> {
        self.route(Route::new(methods, path)?)
    }

    pub fn pass_paths<I, S>(mut self, methods: &str, paths: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for path in paths {
            self = self.pass_path(methods, path.as_ref())?;
        }
        Ok(self)
    }

    /// Forwards every path for `methods`.
    pub fn pass_any_path(self, methods: &str) -> Result<Self, ConfigError> {
        self.pass_path(methods, "/{*path}")
    }

    /// Forwards every path under each of `prefixes` for `methods`.
    pub fn pass_any_path_under<I, S>(mut self, methods: &str, prefixes: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for prefix in prefixes {
            let path = format!("{}/{{*path}}", prefix.as_ref().trim_end_matches('/'));
            self = self.pass_path(methods, &path)?;
        }
        Ok(self)
    }

    /// Forwards requests matching `source` to `target`, with the parameters
    /// captured from `source` substituted into `target`.
    pub fn rewrite_path(self, methods: &str, source: &str, target: &str) -> Result<Self, ConfigError> {
        self.route(Route::new(methods, source)?.rewrite_to(target))
    }

    /// Headers set on every forwarded request. Route headers override them.
    pub fn request_headers(mut self, headers: HeaderMap) -> Self {
        self.request_headers = headers;
        self
    }

    /// A modifier run on every upstream response, before the route's own.
    pub fn modify_response<F>(mut self, modifier: F) -> Self
    where
        F: Fn(&mut Response<Body>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.modify_response = Some(modifier::from_fn(modifier));
        self
    }

    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Parts, ProxyError) -> Response<Body> + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn not_found_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Parts) -> Response<Body> + Send + Sync + 'static,
    {
        self.not_found = Arc::new(handler);
        self
    }

    pub fn method_not_allowed_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Parts, &[Method]) -> Response<Body> + Send + Sync + 'static,
    {
        self.method_not_allowed = Arc::new(handler);
        self
    }

    /// Replaces the default [`HyperTransport`].
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Replaces the default TCP probe and its period. The period is clamped
    /// to [`health::MIN_PERIOD`]`..=`[`health::MAX_PERIOD`].
    pub fn health_check(mut self, probe: impl Probe, period: Duration) -> Self {
        self.probe = Arc::new(probe);
        self.period = period;
        self
    }

    /// Freezes the configuration, probes the origin once and starts the
    /// health monitor. Must be called within a tokio runtime.
    pub async fn build(self) -> ReverseProxy {
        let health = HealthMonitor::start_shared(self.origin.clone(), self.probe, self.period).await;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HyperTransport::new()));
        ReverseProxy {
            inner: Arc::new(Inner {
                origin: self.origin,
                routes: self.routes,
                modifiers: self.modifiers,
                request_headers: self.request_headers,
                modify_response: self.modify_response,
                error_handler: self.error_handler,
                not_found: self.not_found,
                method_not_allowed: self.method_not_allowed,
                transport,
                health,
                load: Arc::new(LoadCounter::new()),
            }),
        }
    }
}

// ── Proxy ─────────────────────────────────────────────────────────────────────

struct Inner {
    origin: Origin,
    routes: RouteTable,
    modifiers: ModifierIndex,
    request_headers: HeaderMap,
    modify_response: Option<ResponseModifier>,
    error_handler: ErrorHandler,
    not_found: NotFoundHandler,
    method_not_allowed: MethodNotAllowedHandler,
    transport: Arc<dyn Transport>,
    health: HealthMonitor,
    load: Arc<LoadCounter>,
}

/// A single-origin reverse proxy. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ReverseProxy {
    inner: Arc<Inner>,
}

impl ReverseProxy {
    pub fn builder(origin: &str) -> Result<ProxyBuilder, ConfigError> {
        ProxyBuilder::new(origin)
    }

    /// Serves one request. Never fails: every outcome is a response.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Body>
    where
        B: hyper::body::Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let inner = &*self.inner;
        let load = inner.load.track();

        let req = req.map(response::boxed);
        let head = head_of(&req);

        let res = match AssertUnwindSafe(inner.dispatch(req)).catch_unwind().await {
            Ok(Ok(res)) => res,
            Ok(Err(err)) => (inner.error_handler)(&head, err),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(method = %head.method, uri = %head.uri, panic = %message, "dispatch panicked");
                (inner.error_handler)(&head, ProxyError::Internal(message))
            }
        };

        // The load is released by the body, once the client has it all.
        res.map(|body| load::track_body(body, load))
    }

    pub fn origin(&self) -> &Origin {
        &self.inner.origin
    }

    /// Whether the origin answered the most recent health probe.
    pub fn is_available(&self) -> bool {
        self.inner.health.is_available()
    }

    /// Requests currently in flight.
    pub fn load(&self) -> usize {
        self.inner.load.get()
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.inner.health
    }

    /// Replaces the health probe; see [`HealthMonitor::set_probe`].
    pub async fn set_health_check(&self, probe: impl Probe, period: Duration) {
        self.inner.health.set_probe(probe, period).await;
    }

    /// Stops background work. Requests are still served afterwards.
    pub async fn shutdown(&self) {
        self.inner.health.stop().await;
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

impl Inner {
    async fn dispatch(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let (mut parts, body) = req.into_parts();

        let matched = match self.routes.lookup(&parts.method, parts.uri.path()) {
            Lookup::Found(matched) => matched,
            Lookup::NotFound => {
                debug!(method = %parts.method, path = parts.uri.path(), "no route");
                return Ok((self.not_found)(&parts));
            }
            Lookup::MethodNotAllowed(allowed) => {
                debug!(method = %parts.method, path = parts.uri.path(), ?allowed, "method not allowed");
                return Ok((self.method_not_allowed)(&parts, &allowed));
            }
        };
        let route = Arc::clone(matched.route);
        let method = parts.method.clone();

        self.prepare_forwarding(&mut parts);

        let path = match route.rewrite_target() {
            Some(target) => pattern::rewrite(target, &matched.params)?,
            None => parts.uri.path().to_owned(),
        };
        parts.uri = self
            .origin
            .target(&path, parts.uri.query())
            .map_err(RewriteError::from)?;

        let mut req = Request::from_parts(parts, body);
        // Global first, so route headers win on shared keys.
        headers::merge_request_headers(&mut req, &[&self.request_headers, route.headers()]);

        debug!(%method, route = route.path(), upstream = %req.uri(), "forwarding");
        let mut res = self
            .transport
            .forward(req)
            .await
            .map_err(ProxyError::Transport)?;
        headers::strip_hop_by_hop(res.headers_mut());

        // Keyed by the registered pattern, not the request path.
        let route_modifier = self.modifiers.get(&method, route.path());
        modifier::apply(&[self.modify_response.as_ref(), route_modifier], &mut res)?;
        Ok(res)
    }

    /// Sets `X-Forwarded-*`, drops hop-by-hop headers and points `Host` at the origin.
    fn prepare_forwarding(&self, parts: &mut Parts) {
        let proto = parts.uri.scheme_str().unwrap_or("http");
        let proto = HeaderValue::from_str(proto).unwrap_or(HeaderValue::from_static("http"));
        let host = parts.headers.get(header::HOST).cloned().or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });

        // Strip before inserting, or a client could smuggle headers through
        // `Connection`.
        headers::strip_hop_by_hop(&mut parts.headers);
        parts.headers.insert(X_FORWARDED_PROTO, proto);
        if let Some(host) = host {
            parts.headers.insert(X_FORWARDED_HOST, host);
        }
        if let Some(ClientAddr(addr)) = parts.extensions.get::<ClientAddr>() {
            headers::append_forwarded_for(&mut parts.headers, &addr.ip().to_string());
        }
        parts.headers.insert(header::HOST, self.origin.host_header().clone());
        parts.version = Version::HTTP_11;
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// A copy of the request head, kept for the error handler.
fn head_of<B>(req: &Request<B>) -> Parts {
    let mut head = Request::new(());
    *head.method_mut() = req.method().clone();
    *head.uri_mut() = req.uri().clone();
    *head.version_mut() = req.version();
    *head.headers_mut() = req.headers().clone();
    *head.extensions_mut() = req.extensions().clone();
    head.into_parts().0
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_owned()
    }
}
