//! HTTP listener and graceful shutdown.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C (or the future passed to
//! [`Server::serve_with_shutdown`]) the server:
//! 1. Stops `listener.accept()` at once. No new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Stops the proxy's health monitor.
//! 4. Returns from [`Server::serve`].

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{ConfigError, Error};
use crate::proxy::{ClientAddr, ReverseProxy};

enum Listen {
    Addr(SocketAddr),
    Listener(TcpListener),
}

/// Accepts connections and hands every request to a [`ReverseProxy`].
pub struct Server {
    listen: Listen,
}

impl Server {
    /// Configures the server to bind to `addr` when it starts serving.
    ///
    /// ```rust,no_run
    /// use revmux::Server;
    /// let server = Server::bind("0.0.0.0:3000")?;
    /// # Ok::<(), revmux::ConfigError>(())
    /// ```
    pub fn bind(addr: &str) -> Result<Self, ConfigError> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(addr.to_owned()))?;
        Ok(Self { listen: Listen::Addr(addr) })
    }

    /// Serves on an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listen: Listen::Listener(listener) }
    }

    /// Serves until SIGTERM or Ctrl-C, then drains and returns.
    pub async fn serve(self, proxy: ReverseProxy) -> Result<(), Error> {
        self.serve_with_shutdown(proxy, shutdown_signal()).await
    }

    /// Serves until `signal` resolves, then drains and returns.
    pub async fn serve_with_shutdown<S>(self, proxy: ReverseProxy, signal: S) -> Result<(), Error>
    where
        S: Future<Output = ()>,
    {
        let listener = match self.listen {
            Listen::Addr(addr) => TcpListener::bind(addr).await?,
            Listen::Listener(listener) => listener,
        };
        let local = listener.local_addr()?;
        info!(addr = %local, origin = %proxy.origin(), "revmux listening");

        // Every spawned connection task, so shutdown can wait for them.
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Shutdown wins over queued connections.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let proxy = proxy.clone();
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |mut req: hyper::Request<hyper::body::Incoming>| {
                            let proxy = proxy.clone();
                            req.extensions_mut().insert(ClientAddr(remote_addr));
                            async move { Ok::<_, Infallible>(proxy.handle(req).await) }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished tasks so the set stays bounded.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        proxy.shutdown().await;
        info!("revmux stopped");
        Ok(())
    }
}

/// Resolves on SIGTERM or SIGINT. A handler that fails to install is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_rejects_malformed_addresses() {
        assert!(Server::bind("127.0.0.1:3000").is_ok());
        assert!(matches!(
            Server::bind("localhost"),
            Err(ConfigError::InvalidListenAddr(addr)) if addr == "localhost"
        ));
    }
}
