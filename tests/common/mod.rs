//! Common test utilities for integration tests.

pub mod fixtures;

use std::net::TcpListener;

// Re-export common types
pub use fixtures::*;

/// Find an available port for testing.
pub fn find_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to port");
    listener.local_addr().unwrap().port()
}

/// Wait for a server to be ready by polling a health endpoint.
pub async fn wait_for_server(addr: &str, timeout_secs: u64) -> bool {
    let client = reqwest::Client::new();
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);

    while start.elapsed() < timeout {
        if let Ok(response) = client.get(format!("http://{}/health", addr)).send().await {
            if response.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    false
}
