//! The upstream origin a proxy forwards to.

use std::fmt;
use std::str::FromStr;

use http::uri::{Authority, Scheme};
use http::{HeaderValue, Uri};

use crate::error::ConfigError;

/// A parsed origin such as `http://backend:8000` or `https://api.internal/v1`.
///
/// A path on the origin is a base path: every forwarded request path is
/// joined under it. A query on the origin is prepended to every forwarded
/// query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin {
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    query: Option<String>,
    host_value: HeaderValue,
}

impl Origin {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidOrigin {
            origin: raw.to_owned(),
            reason: reason.to_owned(),
        };

        let uri: Uri = raw.parse().map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
        let scheme = uri.scheme().cloned().ok_or_else(|| invalid("missing scheme"))?;
        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return Err(invalid("scheme must be http or https"));
        }
        let authority = uri.authority().cloned().ok_or_else(|| invalid("missing host"))?;
        if authority.host().is_empty() {
            return Err(invalid("missing host"));
        }
        if authority.as_str().contains('@') {
            return Err(invalid("credentials are not supported"));
        }
        let host_value = HeaderValue::from_str(authority.as_str())
            .map_err(|_| invalid("host is not a valid header value"))?;
        let base_path = match uri.path() {
            "/" => String::new(),
            path => path.to_owned(),
        };

        Ok(Self {
            scheme,
            authority,
            base_path,
            query: uri.query().map(str::to_owned),
            host_value,
        })
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn host(&self) -> &str {
        self.authority.host()
    }

    /// The explicit port, or the scheme's default.
    pub fn port(&self) -> u16 {
        self.authority.port_u16().unwrap_or(if self.scheme == Scheme::HTTPS { 443 } else { 80 })
    }

    /// `host:port`, suitable for a TCP connect.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }

    /// The value outgoing requests carry in `Host`.
    pub fn host_header(&self) -> &HeaderValue {
        &self.host_value
    }

    /// The absolute upstream URI for a request with `path` and `query`.
    pub fn target(&self, path: &str, query: Option<&str>) -> Result<Uri, http::Error> {
        let mut path_and_query = join_paths(&self.base_path, path);
        let origin_query = self.query.as_deref().filter(|q| !q.is_empty());
        match (origin_query, query.filter(|q| !q.is_empty())) {
            (Some(a), Some(b)) => {
                path_and_query.push('?');
                path_and_query.push_str(a);
                path_and_query.push('&');
                path_and_query.push_str(b);
            }
            (Some(q), None) | (None, Some(q)) => {
                path_and_query.push('?');
                path_and_query.push_str(q);
            }
            (None, None) => {}
        }

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
    }
}

impl FromStr for Origin {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.base_path)
    }
}

/// Joins two paths with exactly one slash between them.
fn join_paths(base: &str, path: &str) -> String {
    if base.is_empty() {
        return if path.is_empty() { "/".to_owned() } else { path.to_owned() };
    }
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}
