//! Child-process transport tests against plain POSIX tools.
#![cfg(unix)]

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use omni_mcp_client::{
    EstablishRequest, MessageTransport, StdioClientTransport, StdioConfig, TransportConnector,
    TransportError, TransportFactory,
};
use reqwest::header::HeaderMap;
use serde_json::json;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn config(command: &str, args: &[&str]) -> StdioConfig {
    let mut env = BTreeMap::new();
    if let Ok(path) = std::env::var("PATH") {
        env.insert("PATH".to_string(), path);
    }
    StdioConfig {
        command: command.to_string(),
        args: args.iter().map(|a| (*a).to_string()).collect(),
        env,
    }
}

#[tokio::test]
async fn cat_echoes_messages_in_order() {
    let transport = StdioClientTransport::new(config("cat", &[]));
    transport.start().await.expect("spawn cat");
    let mut inbound = transport.take_inbound().expect("inbound receiver");
    assert!(transport.take_inbound().is_none());

    for id in 1..=3 {
        transport
            .send(json!({"jsonrpc": "2.0", "id": id, "method": "ping"}))
            .await
            .expect("send");
    }
    for id in 1..=3 {
        let message = timeout(WAIT, inbound.recv())
            .await
            .expect("timely echo")
            .expect("message");
        assert_eq!(message["id"], id);
        assert_eq!(message["method"], "ping");
    }
    transport.close().await;
}

#[tokio::test]
async fn stderr_is_exposed_as_diagnostics() {
    let transport = StdioClientTransport::new(config("sh", &["-c", "echo oops >&2; cat"]));
    transport.start().await.expect("spawn sh");
    let mut diagnostics = transport.take_diagnostics().expect("diagnostics receiver");

    let chunk = timeout(WAIT, diagnostics.recv())
        .await
        .expect("timely stderr")
        .expect("stderr chunk");
    assert!(chunk.contains("oops"), "got {chunk:?}");
    transport.close().await;
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let transport = StdioClientTransport::new(config("cat", &[]));
    transport.start().await.expect("spawn cat");
    assert!(matches!(
        transport.start().await,
        Err(TransportError::AlreadyStarted)
    ));
    transport.close().await;
}

#[tokio::test]
async fn missing_program_fails_to_start() {
    let transport =
        StdioClientTransport::new(config("omni-definitely-not-a-real-program", &[]));
    let err = transport.start().await.unwrap_err();
    assert!(matches!(err, TransportError::Io(_)), "got {err:?}");
}

#[tokio::test]
async fn send_before_start_is_rejected() {
    let transport = StdioClientTransport::new(config("cat", &[]));
    let err = transport
        .send(json!({"jsonrpc": "2.0", "method": "x"}))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::NotStarted));
}

#[tokio::test]
async fn close_resolves_signal_and_rejects_sends() {
    let transport = StdioClientTransport::new(config("cat", &[]));
    transport.start().await.expect("spawn cat");
    let signal = transport.closed();
    transport.close().await;
    transport.close().await;

    let cause = timeout(WAIT, signal.wait()).await.expect("closed");
    assert!(cause.error.is_none());
    assert!(transport.is_closed());
    let err = transport
        .send(json!({"jsonrpc": "2.0", "method": "x"}))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Closed));
}

#[tokio::test]
async fn child_exit_closes_transport_after_output() {
    let transport = StdioClientTransport::new(config(
        "sh",
        &["-c", r#"echo '{"jsonrpc":"2.0","method":"bye"}'"#],
    ));
    transport.start().await.expect("spawn sh");
    let mut inbound = transport.take_inbound().expect("inbound");

    let message = timeout(WAIT, inbound.recv())
        .await
        .expect("timely output")
        .expect("message before EOF");
    assert_eq!(message["method"], "bye");
    timeout(WAIT, transport.closed().wait())
        .await
        .expect("closed on EOF");
    assert!(inbound.recv().await.is_none());
}

#[tokio::test]
async fn non_json_lines_are_skipped() {
    let transport = StdioClientTransport::new(config(
        "sh",
        &["-c", r#"echo 'not json'; echo '{"jsonrpc":"2.0","method":"ok"}'; cat"#],
    ));
    transport.start().await.expect("spawn sh");
    let mut inbound = transport.take_inbound().expect("inbound");
    let message = timeout(WAIT, inbound.recv())
        .await
        .expect("timely output")
        .expect("message");
    assert_eq!(message["method"], "ok");
    transport.close().await;
}

#[tokio::test]
async fn factory_layers_default_and_override_environment() {
    let mut defaults = BTreeMap::new();
    defaults.insert("OMNI_TEST_DEFAULT".to_string(), "from-default".to_string());
    defaults.insert("OMNI_TEST_VAR".to_string(), "shadowed".to_string());
    let factory = TransportFactory::new(defaults);

    let query: HashMap<String, String> = [
        ("transportType", "stdio"),
        ("command", "sh"),
        (
            "args",
            r#"-c 'printf "{\"v\":\"%s\",\"d\":\"%s\"}\n" "$OMNI_TEST_VAR" "$OMNI_TEST_DEFAULT"; cat'"#,
        ),
        ("env", r#"{"OMNI_TEST_VAR":"from-override"}"#),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let request = EstablishRequest::from_query(&query, HeaderMap::new()).expect("request");

    let transport = factory.connect(&request).await.expect("connect");
    let mut inbound = transport.take_inbound().expect("inbound");
    let message = timeout(WAIT, inbound.recv())
        .await
        .expect("timely output")
        .expect("message");
    assert_eq!(message["v"], "from-override");
    assert_eq!(message["d"], "from-default");
    transport.close().await;
}
