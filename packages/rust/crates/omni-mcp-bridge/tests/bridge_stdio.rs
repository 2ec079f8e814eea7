//! End to end over TCP: a real child process behind `/stdio`.

#![cfg(unix)]

mod support;

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use omni_mcp_bridge::{Bridge, BridgeConfig, serve};
use omni_mcp_client::{TransportFactory, default_environment};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use support::read_until;

struct Running {
    addr: SocketAddr,
    bridge: Arc<Bridge>,
    stop: CancellationToken,
    server: tokio::task::JoinHandle<anyhow::Result<()>>,
}

async fn start() -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = BridgeConfig::from_parts(None, None, None).unwrap();
    let bridge = Arc::new(Bridge::new(Arc::new(TransportFactory::new(
        default_environment(),
    ))));
    let stop = CancellationToken::new();
    let token = stop.clone();
    let server = tokio::spawn(serve(listener, Arc::clone(&bridge), config, async move {
        token.cancelled().await;
    }));
    Running {
        addr,
        bridge,
        stop,
        server,
    }
}

#[tokio::test]
async fn child_process_round_trip_with_stderr() {
    let running = start().await;
    let http = reqwest::Client::new();

    let response = http
        .get(format!("http://{}/stdio", running.addr))
        .query(&[
            ("transportType", "stdio"),
            ("command", "sh"),
            ("args", "-c 'echo booting >&2; exec cat'"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let mut events = response.bytes_stream();
    let mut buffer = String::new();
    read_until(&mut events, &mut buffer, "\n\n").await;
    let endpoint = buffer
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .expect("endpoint event")
        .to_string();

    // `cat` sends every message straight back.
    let posted = http
        .post(format!("http://{}{endpoint}", running.addr))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(posted.status(), reqwest::StatusCode::ACCEPTED);

    read_until(&mut events, &mut buffer, r#""method":"ping""#).await;
    read_until(&mut events, &mut buffer, "notifications/stderr").await;
    read_until(&mut events, &mut buffer, "booting").await;
    assert_eq!(running.bridge.registry().len(), 1);

    running.stop.cancel();
    running.server.await.unwrap().unwrap();
    assert!(running.bridge.registry().is_empty());
}

#[tokio::test]
async fn missing_program_is_a_500() {
    let running = start().await;

    let response = reqwest::Client::new()
        .get(format!("http://{}/stdio", running.addr))
        .query(&[
            ("transportType", "stdio"),
            ("command", "omni-definitely-not-installed"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], 500);
    assert!(running.bridge.registry().is_empty());

    running.stop.cancel();
    running.server.await.unwrap().unwrap();
}
