//! The body type flowing through the proxy and small response shortcuts.
//!
//! Upstream bodies are streamed, never buffered: whatever the transport hands
//! back is boxed into [`Body`] and relayed as-is. The shortcuts below only
//! build the proxy's own answers (404, 405, error responses).

use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode, header};
use http_body_util::{BodyExt, Empty, Full, combinators::UnsyncBoxBody};

use crate::error::BoxError;

/// The one body type requests and responses carry inside the proxy.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

/// Boxes any body whose error converts into [`BoxError`].
pub fn boxed<B>(body: B) -> Body
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// A body with no bytes.
pub fn empty() -> Body {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// A body holding `bytes` in full.
pub fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

/// `code` with its canonical reason phrase as a plain-text body.
///
/// ```rust
/// use http::StatusCode;
///
/// let res = revmux::response::status(StatusCode::NOT_FOUND);
/// assert_eq!(res.status(), StatusCode::NOT_FOUND);
/// ```
pub fn status(code: StatusCode) -> Response<Body> {
    text(code, code.canonical_reason().unwrap_or_default())
}

/// `code` with `message` as a plain-text body.
pub fn text(code: StatusCode, message: impl Into<String>) -> Response<Body> {
    let mut res = Response::new(full(message.into()));
    *res.status_mut() = code;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res
}
