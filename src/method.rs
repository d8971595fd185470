//! Method-set specifications.
//!
//! Routes name their methods with a compact string:
//!
//! | Spec | Expands to |
//! |---|---|
//! | `"*"` | `GET, HEAD, OPTIONS, POST, PUT, PATCH, DELETE` |
//! | `"GET\|POST"` | `GET, POST` (input order kept) |
//! | `"PURGE"` | `PURGE` |
//!
//! Tokens are case-sensitive per RFC 9110 §9.1 and are not trimmed. Any token
//! that is not a valid HTTP method token is a [`ConfigError::InvalidMethod`].

use http::Method;

use crate::error::ConfigError;

/// The methods `"*"` expands to, in this order.
pub const ANY: [Method; 7] = [
    Method::GET,
    Method::HEAD,
    Method::OPTIONS,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
];

const SEPARATOR: char = '|';

/// Expands a method spec into the ordered list of methods it names.
///
/// Duplicates are kept; registering the same method twice is harmless.
pub fn parse(spec: &str) -> Result<Vec<Method>, ConfigError> {
    if spec == "*" {
        return Ok(ANY.to_vec());
    }
    spec.split(SEPARATOR)
        .map(|token| {
            if token.is_empty() {
                return Err(ConfigError::InvalidMethod(spec.to_owned()));
            }
            Method::from_bytes(token.as_bytes())
                .map_err(|_| ConfigError::InvalidMethod(token.to_owned()))
        })
        .collect()
}
