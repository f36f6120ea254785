//! S5 (§8): an endpoint that answers with HTTP 429 is classified as
//! rate-limited and, once the pool switches away from it, the next endpoint
//! serves the request successfully — the liveness property a rate-limited
//! provider must not satisfy. Exercised against a real HTTP transport (two
//! local listeners) rather than `alloy`'s JSON-RPC block/receipt payload
//! shapes, since only the transport-level 429 classification and the
//! round-robin rotation are under test here, not the scanner's decode path.

use evm_chain_indexer::monitor::MonitorSink;
use evm_chain_indexer::provider::{is_rate_limited, Pool};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Default)]
struct CapturingMonitor {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl MonitorSink for CapturingMonitor {
    async fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Serves one HTTP request with a fixed status/body, then closes the
/// connection. Runs until `rounds` requests have been served.
async fn serve_fixed_response(listener: TcpListener, status_line: &'static str, body: &'static str, rounds: usize) {
    for _ in 0..rounds {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        let response = format!(
            "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    }
}

#[tokio::test]
async fn test_rate_limited_endpoint_fails_over_to_a_live_one() {
    let limited_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let limited_addr = limited_listener.local_addr().unwrap();
    let live_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_addr = live_listener.local_addr().unwrap();

    let rate_limited_body = "";
    tokio::spawn(serve_fixed_response(
        limited_listener,
        "HTTP/1.1 429 Too Many Requests",
        rate_limited_body,
        1,
    ));
    let live_body = r#"{"jsonrpc":"2.0","id":1,"result":"0x2a"}"#;
    tokio::spawn(serve_fixed_response(live_listener, "HTTP/1.1 200 OK", live_body, 1));

    let monitor = Arc::new(CapturingMonitor::default());
    let pool = Pool::new(
        vec![format!("http://{limited_addr}"), format!("http://{live_addr}")],
        monitor.clone(),
    )
    .await
    .unwrap();

    let first = pool.block_number().await;
    assert!(first.is_err(), "the 429 endpoint must surface as an error");
    assert!(is_rate_limited(&first.unwrap_err().to_string()));

    pool.switch().await.unwrap();
    let second = pool.block_number().await;
    assert_eq!(second.unwrap(), 42, "the live endpoint answers once switched to");

    assert_eq!(monitor.messages.lock().unwrap().len(), 1, "exactly one failover notification");
}
