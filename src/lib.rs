//! # revmux
//!
//! A reverse proxy for exactly one origin, routed by method and path.
//!
//! ## The model
//!
//! Every route names the methods it accepts and a path pattern. A matching
//! request is forwarded to the origin, optionally under a rewritten path,
//! and the upstream response runs through a chain of modifiers before it is
//! sent back. Anything that goes wrong after a match ends in one error
//! handler.
//!
//! - Radix-tree routing, one tree per method, via [`matchit`]
//! - Path rewriting with `{name}` / `{*rest}` substitution
//! - A global response modifier, then one per (method, path) registration
//! - A background health probe and an in-flight request counter
//! - Graceful shutdown on SIGTERM / Ctrl-C
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use revmux::{ProxyBuilder, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), revmux::Error> {
//!     let proxy = ProxyBuilder::new("http://backend:8000")?
//!         .rewrite_path("GET|POST", "/items", "/api/items")?
//!         .pass_any_path_under("GET", ["/static"])?
//!         .modify_response(|res| {
//!             res.headers_mut().insert("x-served-by", "revmux".parse()?);
//!             Ok(())
//!         })
//!         .build()
//!         .await;
//!
//!     Server::bind("0.0.0.0:3000")?.serve(proxy).await
//! }
//! ```

mod error;
mod load;
mod origin;
mod pattern;
mod proxy;
mod route;
mod router;
mod server;
mod transport;

pub mod headers;
pub mod health;
pub mod method;
pub mod modifier;
pub mod response;

pub use error::{BoxError, ConfigError, Error, ProxyError, RewriteError};
pub use health::{HealthMonitor, Probe, TcpProbe};
pub use load::{LoadCounter, LoadGuard};
pub use origin::Origin;
pub use pattern::{Params, Pattern, PatternError};
pub use proxy::{
    ClientAddr, ErrorHandler, MethodNotAllowedHandler, NotFoundHandler, ProxyBuilder, ReverseProxy,
};
pub use response::Body;
pub use route::{ResponseModifier, Route};
pub use router::{Lookup, RouteMatch, RouteTable};
pub use server::Server;
pub use transport::{HyperTransport, Transport, TransportFuture};

pub use http::Method;
