//! Header merging and forwarding helpers.
//!
//! Two merge semantics exist and they are deliberately different:
//!
//! - **Replace** ([`merge`], [`merge_request_headers`]):
//!   sources are applied in order and a key present in a later source replaces
//!   the whole value list of the earlier one.
//! - **Set-then-add** ([`merge_sink_headers`]): for every key of a source the
//!   first value is *set* on the sink and the remaining values are *appended*.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::Request;

pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

const PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");
const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Connection-scoped headers that must not cross the proxy (RFC 9110 §7.6.1).
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    KEEP_ALIVE,
    PROXY_CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Applies `sources` onto `dst` in order with whole-value replacement.
pub fn merge(dst: &mut HeaderMap, sources: &[&HeaderMap]) {
    for source in sources {
        for key in source.keys() {
            dst.remove(key);
            for value in source.get_all(key) {
                dst.append(key.clone(), value.clone());
            }
        }
    }
}

/// Merges `sources` into the request's headers, later sources winning.
pub fn merge_request_headers<B>(req: &mut Request<B>, sources: &[&HeaderMap]) {
    merge(req.headers_mut(), sources);
}

/// Writes `sources` into a response sink: first value set, the rest appended.
pub fn merge_sink_headers(sink: &mut HeaderMap, sources: &[&HeaderMap]) {
    for source in sources {
        for key in source.keys() {
            let mut values = source.get_all(key).iter();
            if let Some(first) = values.next() {
                sink.insert(key.clone(), first.clone());
            }
            for value in values {
                sink.append(key.clone(), value.clone());
            }
        }
    }
}

/// Removes hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Appends `client` to `X-Forwarded-For`, folding earlier hops into one line.
pub fn append_forwarded_for(headers: &mut HeaderMap, client: &str) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let joined = if prior.is_empty() {
        client.to_owned()
    } else {
        format!("{}, {client}", prior.join(", "))
    };
    if let Ok(value) = HeaderValue::from_str(&joined) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Response;

    fn map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.append(*k, HeaderValue::from_static(v));
        }
        headers
    }

    fn values<'a>(headers: &'a HeaderMap, key: &str) -> Vec<&'a str> {
        headers.get_all(key).iter().map(|v| v.to_str().unwrap()).collect()
    }

    #[test]
    fn merge_adds_disjoint_keys() {
        let mut req = Request::new(());
        let a = map(&[("content-type", "application/json")]);
        let b = map(&[("accept", "application/json")]);
        merge_request_headers(&mut req, &[&a, &b]);
        assert_eq!(req.headers().len(), 2);
        assert_eq!(values(req.headers(), "accept"), ["application/json"]);
    }

    #[test]
    fn later_source_replaces_the_whole_value_list() {
        let mut req = Request::new(());
        req.headers_mut().append("x-tag", HeaderValue::from_static("client"));
        let global = map(&[("x-tag", "one"), ("x-tag", "two"), ("x-keep", "g")]);
        let route = map(&[("x-tag", "three")]);
        merge_request_headers(&mut req, &[&global, &route]);
        assert_eq!(values(req.headers(), "x-tag"), ["three"]);
        assert_eq!(values(req.headers(), "x-keep"), ["g"]);
    }

    #[test]
    fn last_source_containing_a_key_wins_even_when_later_sources_lack_it() {
        let mut res = Response::new(());
        let a = map(&[("x-a", "1")]);
        let b = map(&[("x-a", "2"), ("x-a", "3")]);
        let c = map(&[("x-b", "4")]);
        merge(res.headers_mut(), &[&a, &b, &c]);
        assert_eq!(values(res.headers(), "x-a"), ["2", "3"]);
        assert_eq!(values(res.headers(), "x-b"), ["4"]);
    }

    #[test]
    fn sink_sets_first_then_adds_rest() {
        let mut sink = map(&[("x-multi", "stale")]);
        let source = map(&[("x-multi", "v1"), ("x-multi", "v2"), ("x-multi", "v3")]);
        merge_sink_headers(&mut sink, &[&source]);
        assert_eq!(values(&sink, "x-multi"), ["v1", "v2", "v3"]);
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = map(&[
            ("connection", "keep-alive, x-secret"),
            ("keep-alive", "timeout=5"),
            ("x-secret", "s"),
            ("upgrade", "websocket"),
            ("x-kept", "k"),
        ]);
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-kept"));
    }

    #[test]
    fn forwarded_for_accumulates_hops() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.1");
        assert_eq!(values(&headers, "x-forwarded-for"), ["10.0.0.1"]);
        append_forwarded_for(&mut headers, "10.0.0.2");
        assert_eq!(values(&headers, "x-forwarded-for"), ["10.0.0.1, 10.0.0.2"]);
    }
}
