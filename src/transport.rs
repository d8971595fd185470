//! The forwarding engine behind the dispatcher.
//!
//! # What a transport owns
//!
//! The dispatcher decides *what* to send: route, path, headers. The
//! transport decides *how*: connections, pooling, timeouts, body streaming.
//! It receives a fully prepared request with an absolute URI and returns the
//! upstream response, or an error when the origin could not be reached.
//!
//! ```text
//! ReverseProxy::handle(req)
//!        ↓ route, rewrite, merge headers
//! transport.forward(req)              ← one vtable call
//!        ↓
//! Pin<Box<dyn Future<Output = Result<Response<Body>, BoxError>>>>
//! ```
//!
//! [`HyperTransport`] is the default. Any async closure with the right
//! signature is a transport too, which is how tests stand in for an origin.

use std::future::Future;
use std::pin::Pin;

use http::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::error::BoxError;
use crate::response::{self, Body};

/// A heap-allocated, type-erased future resolving to the upstream response.
pub type TransportFuture = Pin<Box<dyn Future<Output = Result<Response<Body>, BoxError>> + Send + 'static>>;

/// Performs the network call to the origin.
pub trait Transport: Send + Sync + 'static {
    fn forward(&self, req: Request<Body>) -> TransportFuture;
}

/// Any `Fn(Request<Body>) -> impl Future<Output = Result<Response<Body>, BoxError>>`.
impl<F, Fut> Transport for F
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<Body>, BoxError>> + Send + 'static,
{
    fn forward(&self, req: Request<Body>) -> TransportFuture {
        Box::pin((self)(req))
    }
}

/// Pooled HTTP/1.1 client over plain TCP.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Body>,
}

impl HyperTransport {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HyperTransport {
    fn forward(&self, req: Request<Body>) -> TransportFuture {
        let pending = self.client.request(req);
        Box::pin(async move {
            let res = pending.await?;
            Ok(res.map(response::boxed))
        })
    }
}
