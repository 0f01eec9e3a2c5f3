//! IPC socket integration tests
//!
//! Runs a real server on a temporary Unix socket and talks to it with the
//! bundled client and with raw frames, as a browser host would.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;

use container_gate::config::IpcConfig;
use container_gate::error::IpcError;
use container_gate::gate::PendingEvent;
use container_gate::ipc::{IpcClient, IpcCommand, IpcResponse, IpcServer};
use container_gate::rules::{RuleState, SubdomainSetting};

use super::{build_handler, intercept, seeded_provider, PERSONAL, SHOPPING};

// ============================================================================
// Test Helpers
// ============================================================================

fn start_server(socket_path: &Path) -> JoinHandle<Result<(), IpcError>> {
    let config = IpcConfig {
        socket_path: socket_path.to_path_buf(),
        socket_mode: 0o600,
        enabled: true,
        max_message_size: 64 * 1024,
    };
    let handler = Arc::new(build_handler(seeded_provider(), RuleState::new(), None));
    let server = IpcServer::new(config, handler);
    tokio::spawn(async move { server.run().await })
}

async fn wait_for_socket(client: &IpcClient) {
    for _ in 0..50 {
        if client.ping().await.unwrap_or(false) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("IPC server did not come up");
}

async fn raw_roundtrip(socket_path: &Path, request: &Value) -> Value {
    let mut stream = UnixStream::connect(socket_path).await.unwrap();
    let body = serde_json::to_vec(request).unwrap();
    let len = u32::try_from(body.len()).unwrap();
    stream.write_all(&len.to_be_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let mut response = vec![0u8; u32::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut response).await.unwrap();
    serde_json::from_slice(&response).unwrap()
}

// ============================================================================
// Client Tests
// ============================================================================

#[tokio::test]
async fn test_intent_flow_over_socket() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("gate.sock");
    let server = start_server(&socket_path);
    let client = IpcClient::new(&socket_path);
    wait_for_socket(&client).await;

    let response = client
        .send(IpcCommand::AddRule {
            domain: "Shop.Example".into(),
            container_name: "Shopping".into(),
            subdomains: SubdomainSetting::Inherit,
        })
        .await
        .unwrap();
    let IpcResponse::Rule { domain, rule } = response else {
        panic!("Expected Rule response, got {response:?}");
    };
    assert_eq!(domain, "shop.example");
    assert_eq!(rule.owner_id, SHOPPING);

    let response = client
        .send(intercept(1, SHOPPING, "https://cdn.shop.example/app.js"))
        .await
        .unwrap();
    let IpcResponse::Verdict(decision) = response else {
        panic!("Expected Verdict response, got {response:?}");
    };
    assert!(decision.is_allowed());

    let response = client.send(IpcCommand::Shutdown).await.unwrap();
    assert!(matches!(response, IpcResponse::Success { .. }));

    let result = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server should stop after shutdown intent")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_subscriber_follows_pending_count() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("gate.sock");
    let server = start_server(&socket_path);
    let client = IpcClient::new(&socket_path);
    wait_for_socket(&client).await;

    let mut badge = client.subscribe(Some(3)).await.unwrap();

    client
        .send(intercept(3, PERSONAL, "https://tracker.io/a.js"))
        .await
        .unwrap();
    client
        .send(IpcCommand::AllowOnce {
            tab_id: 3,
            domain: "tracker.io".into(),
        })
        .await
        .unwrap();

    for (domains, requests) in [(1, 1), (0, 0)] {
        let event = tokio::time::timeout(Duration::from_secs(2), badge.next())
            .await
            .expect("pending change was not pushed")
            .unwrap();
        assert_eq!(
            event,
            Some(PendingEvent::CountChanged {
                tab_id: 3,
                domains,
                requests,
            })
        );
    }

    server.abort();
}

// ============================================================================
// Wire Format Tests
// ============================================================================

#[tokio::test]
async fn test_raw_wire_format() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("gate.sock");
    let server = start_server(&socket_path);
    wait_for_socket(&IpcClient::new(&socket_path)).await;

    let verdict = raw_roundtrip(
        &socket_path,
        &json!({
            "type": "intercept",
            "event": {
                "requestId": "42",
                "tabId": 3,
                "cookieStoreId": PERSONAL,
                "url": "https://tracker.io/p.gif",
                "resourceType": "image"
            }
        }),
    )
    .await;
    assert_eq!(verdict["type"], "verdict");
    assert_eq!(verdict["requestId"], "42");
    assert_eq!(verdict["verdict"]["action"], "block");
    assert_eq!(verdict["reason"], "paused");
    assert_eq!(verdict["pendingCount"], 1);

    let pending = raw_roundtrip(
        &socket_path,
        &json!({ "type": "getPendingRequests", "tabId": 3 }),
    )
    .await;
    assert_eq!(pending["type"], "pendingRequests");
    assert_eq!(pending["requests"][0]["domain"], "tracker.io");
    assert_eq!(pending["requests"][0]["count"], 1);

    let error = raw_roundtrip(
        &socket_path,
        &json!({ "type": "removeRule", "domain": "nope.example" }),
    )
    .await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "NOT_FOUND");

    let unknown = raw_roundtrip(&socket_path, &json!({ "type": "launchRockets" })).await;
    assert_eq!(unknown["type"], "error");

    server.abort();
}
