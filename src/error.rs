//! Error types.
//!
//! Two families, two lifetimes:
//!
//! - [`ConfigError`] / [`Error`] surface at setup. They are returned to the
//!   caller synchronously and stop construction.
//! - [`ProxyError`] surfaces while serving. It never propagates to hyper; the
//!   dispatcher hands it to the configured error handler, which turns it into
//!   a response.

use http::StatusCode;
use thiserror::Error;

use crate::pattern::PatternError;

/// A boxed, thread-safe error. Transport failures and response-modifier
/// failures are carried as this type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The crate-level error returned by fallible setup and server operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid configuration detected while building a proxy or a server.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid origin `{origin}`: {reason}")]
    InvalidOrigin { origin: String, reason: String },

    #[error("invalid method `{0}`")]
    InvalidMethod(String),

    #[error("route registered without any method")]
    NoMethods,

    #[error("invalid path pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: PatternError,
    },

    #[error("route `{pattern}` conflicts with an existing route: {reason}")]
    Conflict { pattern: String, reason: String },

    #[error("invalid listen address `{0}`")]
    InvalidListenAddr(String),
}

/// Failure to rewrite a matched request path into its target pattern.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("invalid rewrite target `{target}`: {source}")]
    Pattern {
        target: String,
        #[source]
        source: PatternError,
    },

    #[error("rewrite target references `{0}`, which the route does not capture")]
    MissingParam(String),

    #[error("rewritten uri is invalid: {0}")]
    Uri(#[from] http::Error),
}

/// A per-request failure, handed to the error handler.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("path rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("response modifier failed: {0}")]
    Modifier(#[source] BoxError),

    #[error("upstream request failed: {0}")]
    Transport(#[source] BoxError),

    /// A panic caught at the dispatch boundary.
    #[error("internal fault: {0}")]
    Internal(String),
}

impl ProxyError {
    /// The status the default error handler answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Rewrite(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Modifier(_) | Self::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
