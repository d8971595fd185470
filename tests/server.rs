use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use revmux::{ProxyBuilder, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// A bare HTTP/1.1 origin: records each request head and answers `200 ok`.
async fn origin() -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let heads: Arc<Mutex<Vec<String>>> = Arc::default();
    let log = Arc::clone(&heads);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { return };
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                log.lock().unwrap().push(String::from_utf8_lossy(&buf).into_owned());
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                    .await;
            });
        }
    });
    (addr, heads)
}

#[tokio::test]
async fn proxies_over_real_sockets_and_shuts_down_cleanly() {
    let (origin_addr, heads) = origin().await;
    let proxy = ProxyBuilder::new(&format!("http://{origin_addr}"))
        .unwrap()
        .rewrite_path("GET", "/items", "/api/items")
        .unwrap()
        .build()
        .await;
    assert!(proxy.is_available());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(Server::from_listener(listener).serve_with_shutdown(proxy.clone(), async move {
        let _ = stopped.await;
    }));

    let client: Client<HttpConnector, Empty<Bytes>> =
        Client::builder(TokioExecutor::new()).build(HttpConnector::new());

    let req = Request::get(format!("http://{proxy_addr}/items?page=1"))
        .header("connection", "close")
        .body(Empty::new())
        .unwrap();
    let res = client.request(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, "ok");

    let head = heads.lock().unwrap().last().cloned().unwrap().to_ascii_lowercase();
    assert!(head.starts_with("get /api/items?page=1 http/1.1\r\n"), "{head}");
    assert!(head.contains(&format!("host: {origin_addr}\r\n")));
    assert!(head.contains(&format!("x-forwarded-host: {proxy_addr}\r\n")));
    assert!(head.contains("x-forwarded-for: 127.0.0.1\r\n"));

    let req = Request::get(format!("http://{proxy_addr}/missing"))
        .header("connection", "close")
        .body(Empty::new())
        .unwrap();
    assert_eq!(client.request(req).await.unwrap().status(), StatusCode::NOT_FOUND);

    drop(client);
    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
    assert!(!proxy.health().is_running().await);
    assert_eq!(proxy.load(), 0);
}
