//! Minimal revmux example: an API and static assets behind one origin.
//!
//! Run with a backend on port 8000, then:
//!   cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/items            # → GET /api/items on the backend
//!   curl -i -X POST http://localhost:3000/items    # → POST /api/items
//!   curl -i http://localhost:3000/users/42         # → GET /api/v2/users/42
//!   curl -i http://localhost:3000/static/app.js    # → GET /static/app.js
//!   curl -i -X DELETE http://localhost:3000/items  # 405, Allow: GET, POST

use http::{HeaderMap, HeaderValue, StatusCode};
use revmux::{ProxyBuilder, Route, Server, response};

#[tokio::main]
async fn main() -> Result<(), revmux::Error> {
    tracing_subscriber::fmt::init();

    let mut common = HeaderMap::new();
    common.insert("x-proxy", HeaderValue::from_static("revmux"));

    let proxy = ProxyBuilder::new("http://127.0.0.1:8000")?
        .request_headers(common)
        .rewrite_path("GET|POST", "/items", "/api/items")?
        .route(
            Route::new("GET", "/users/{id}")?
                .rewrite_to("/api/v2/users/{id}")
                .modify_response(|res| {
                    res.headers_mut()
                        .insert("cache-control", HeaderValue::from_static("no-store"));
                    Ok(())
                }),
        )?
        .pass_any_path_under("GET|HEAD", ["/static"])?
        .modify_response(|res| {
            res.headers_mut().insert("x-served-by", HeaderValue::from_static("revmux"));
            Ok(())
        })
        .error_handler(|parts, err| {
            tracing::warn!(uri = %parts.uri, error = %err, "upstream failed");
            response::text(err.status(), "the backend is having a moment\n")
        })
        .not_found_handler(|parts| {
            response::text(StatusCode::NOT_FOUND, format!("nothing routed at {}\n", parts.uri.path()))
        })
        .build()
        .await;

    if !proxy.is_available() {
        tracing::warn!(origin = %proxy.origin(), "origin is not reachable yet");
    }

    Server::bind("0.0.0.0:3000")?.serve(proxy).await
}
