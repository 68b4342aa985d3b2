//! Batch protocol behaviour against a scripted local endpoint.
//!
//! The resume contract matters for crash recovery: with an
//! `existing_batch_id` the client must skip upload and creation and go
//! straight to polling.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai_llm_service::batch::{BatchClient, BatchLine, BatchOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves one canned HTTP/1.1 response per connection, recording each
/// request line (e.g. `GET /v1/batches/b1`).
async fn scripted_server(bodies: Vec<String>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    tokio::spawn(async move {
        for body in bodies {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let mut buf = vec![0u8; 65536];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let head = String::from_utf8_lossy(&buf[..n]);
            let request_line = head.lines().next().unwrap_or("").to_string();
            log.lock().unwrap().push(request_line);

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    (format!("http://{addr}"), seen)
}

fn completed_batch(id: &str) -> String {
    format!(r#"{{"id":"{id}","status":"completed","output_file_id":"file-out"}}"#)
}

const OUTPUT_JSONL: &str =
    r#"{"custom_id":"7","response":{"status_code":200,"body":{"answer":42}}}"#;

fn fast_opts(existing: Option<&str>) -> BatchOptions {
    BatchOptions {
        existing_batch_id: existing.map(|s| s.to_string()),
        on_batch_created: None,
        deadline: Some(Duration::from_secs(5)),
        poll_base: Some(Duration::from_millis(10)),
    }
}

#[tokio::test]
async fn existing_batch_id_skips_upload_and_create() {
    let (base, seen) = scripted_server(vec![
        completed_batch("b1"),
        OUTPUT_JSONL.to_string(),
    ])
    .await;

    let client = BatchClient::new(reqwest::Client::new(), base);
    let items = client
        .run("/v1/chat/completions", Vec::new(), fast_opts(Some("b1")))
        .await
        .unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].custom_id, "7");
    assert_eq!(items[0].result.as_ref().unwrap()["answer"], 42);

    let requests = seen.lock().unwrap().clone();
    assert_eq!(requests.len(), 2, "poll + download only");
    assert!(requests[0].starts_with("GET /v1/batches/b1"));
    assert!(requests[1].starts_with("GET /v1/files/file-out/content"));
    assert!(
        !requests.iter().any(|r| r.starts_with("POST")),
        "resume must not upload or create"
    );
}

#[tokio::test]
async fn fresh_run_uploads_creates_polls_downloads() {
    let (base, seen) = scripted_server(vec![
        r#"{"id":"file-in"}"#.to_string(),
        r#"{"id":"b9","status":"validating"}"#.to_string(),
        completed_batch("b9"),
        OUTPUT_JSONL.to_string(),
    ])
    .await;

    let created = Arc::new(Mutex::new(None::<String>));
    let created_probe = created.clone();
    let opts = BatchOptions {
        on_batch_created: Some(Box::new(move |id| {
            *created_probe.lock().unwrap() = Some(id.to_string());
        })),
        ..fast_opts(None)
    };

    let lines = vec![BatchLine {
        custom_id: "7".into(),
        method: "POST",
        url: "/v1/chat/completions",
        body: serde_json::json!({"model": "m"}),
    }];

    let client = BatchClient::new(reqwest::Client::new(), base);
    let items = client.run("/v1/chat/completions", lines, opts).await.unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(created.lock().unwrap().as_deref(), Some("b9"));

    let requests = seen.lock().unwrap().clone();
    assert!(requests[0].starts_with("POST /v1/files"));
    assert!(requests[1].starts_with("POST /v1/batches"));
    assert!(requests[2].starts_with("GET /v1/batches/b9"));
    assert!(requests[3].starts_with("GET /v1/files/file-out/content"));
}

#[tokio::test]
async fn terminal_failure_carries_first_error_message() {
    let (base, _seen) = scripted_server(vec![
        r#"{"id":"b2","status":"failed","errors":{"data":[{"message":"quota exceeded"},{"message":"second"}]}}"#
            .to_string(),
    ])
    .await;

    let client = BatchClient::new(reqwest::Client::new(), base);
    let err = client
        .run("/v1/chat/completions", Vec::new(), fast_opts(Some("b2")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("quota exceeded"));
}
