//! Retry behaviour against a scripted local HTTP endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rate_limited_http::{RateLimitConfig, RateLimitedClient};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves one canned HTTP/1.1 response per accepted connection.
async fn scripted_server(responses: Vec<String>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        for body in responses {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(body.as_bytes()).await;
        }
    });

    (format!("http://{addr}/"), hits)
}

fn response(status_line: &str, extra_headers: &str) -> String {
    format!(
        "HTTP/1.1 {status_line}\r\n{extra_headers}Content-Length: 2\r\nConnection: close\r\n\r\nok"
    )
}

#[tokio::test]
async fn retries_once_on_429_honouring_retry_after() {
    let (url, hits) = scripted_server(vec![
        response("429 Too Many Requests", "Retry-After: 1\r\n"),
        response("200 OK", ""),
    ])
    .await;

    let client = RateLimitedClient::new(reqwest::Client::new(), RateLimitConfig::default());
    let request = client.inner().get(&url).build().unwrap();

    let started = Instant::now();
    let resp = client.execute(request).await.unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(hits.load(Ordering::SeqCst), 2, "exactly one retry");
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn returns_last_response_when_retries_exhausted() {
    let cfg = RateLimitConfig {
        max_retries: 1,
        base_backoff: Duration::from_millis(10),
        ..Default::default()
    };
    let (url, hits) = scripted_server(vec![
        response("429 Too Many Requests", ""),
        response("429 Too Many Requests", ""),
    ])
    .await;

    let client = RateLimitedClient::new(reqwest::Client::new(), cfg);
    let request = client.inner().get(&url).build().unwrap();

    let resp = client.execute(request).await.unwrap();
    assert_eq!(resp.status().as_u16(), 429, "last response surfaced, no error");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn passes_through_success_without_retry() {
    let (url, hits) = scripted_server(vec![response("200 OK", "")]).await;

    let client = RateLimitedClient::new(reqwest::Client::new(), RateLimitConfig::default());
    let request = client.inner().get(&url).build().unwrap();

    let resp = client.execute(request).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
