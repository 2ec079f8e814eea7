//! Tests for query parsing, header allow-lists and environment layering.

use std::collections::{BTreeMap, HashMap};

use omni_mcp_client::{
    EstablishError, EstablishRequest, TransportKind, TransportParams, compose_environment,
    forwarded_headers,
};
use reqwest::header::{HeaderMap, HeaderValue};

fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn stdio_query_tokenizes_args_and_parses_env() {
    let params = TransportParams::from_query(&query(&[
        ("transportType", "stdio"),
        ("command", "npx"),
        ("args", r#"-y server --name "My Name""#),
        ("env", r#"{"API_KEY":"secret","RETRIES":3}"#),
    ]))
    .expect("parse");
    assert_eq!(
        params,
        TransportParams::Stdio {
            command: "npx".to_string(),
            args: vec![
                "-y".to_string(),
                "server".to_string(),
                "--name".to_string(),
                "My Name".to_string(),
            ],
            env: map(&[("API_KEY", "secret"), ("RETRIES", "3")]),
        }
    );
    assert_eq!(params.kind(), TransportKind::Stdio);
}

#[test]
fn stdio_query_without_args_or_env() {
    let params = TransportParams::from_query(&query(&[
        ("transportType", "stdio"),
        ("command", "cat"),
    ]))
    .expect("parse");
    match params {
        TransportParams::Stdio { command, args, env } => {
            assert_eq!(command, "cat");
            assert!(args.is_empty());
            assert!(env.is_empty());
        }
        other => panic!("expected stdio, got {other:?}"),
    }
}

#[test]
fn stdio_query_requires_command() {
    let err = TransportParams::from_query(&query(&[("transportType", "stdio")])).unwrap_err();
    assert!(
        matches!(err, EstablishError::InvalidParameter { name: "command", .. }),
        "got {err:?}"
    );
    assert_eq!(err.status(), 500);
}

#[test]
fn stdio_query_rejects_malformed_env_and_args() {
    let err = TransportParams::from_query(&query(&[
        ("transportType", "stdio"),
        ("command", "cat"),
        ("env", "not json"),
    ]))
    .unwrap_err();
    assert!(matches!(err, EstablishError::InvalidParameter { name: "env", .. }));

    let err = TransportParams::from_query(&query(&[
        ("transportType", "stdio"),
        ("command", "cat"),
        ("args", r#"--name "open"#),
    ]))
    .unwrap_err();
    assert!(matches!(err, EstablishError::InvalidParameter { name: "args", .. }));
}

#[test]
fn network_queries_parse_url() {
    let sse = TransportParams::from_query(&query(&[
        ("transportType", "sse"),
        ("url", "http://127.0.0.1:3001/sse"),
    ]))
    .expect("parse sse");
    assert_eq!(sse.kind(), TransportKind::Sse);

    let http = TransportParams::from_query(&query(&[
        ("transportType", "streamable-http"),
        ("url", "http://127.0.0.1:3001/mcp"),
    ]))
    .expect("parse streamable-http");
    match http {
        TransportParams::StreamableHttp { url } => assert_eq!(url.path(), "/mcp"),
        other => panic!("expected streamable-http, got {other:?}"),
    }

    let err = TransportParams::from_query(&query(&[
        ("transportType", "sse"),
        ("url", "not a url"),
    ]))
    .unwrap_err();
    assert!(matches!(err, EstablishError::InvalidParameter { name: "url", .. }));
}

#[test]
fn unknown_transport_kind_is_rejected() {
    let err = EstablishRequest::from_query(
        &query(&[("transportType", "websocket"), ("url", "ws://x")]),
        HeaderMap::new(),
    )
    .unwrap_err();
    assert!(matches!(err, EstablishError::InvalidTransportKind(ref kind) if kind == "websocket"));
    assert_eq!(err.to_string(), "Invalid transport type specified: websocket");
    assert!(!err.is_unauthorized());

    let err = TransportParams::from_query(&query(&[])).unwrap_err();
    assert!(matches!(err, EstablishError::InvalidTransportKind(_)));
}

#[test]
fn transport_kind_round_trips_through_str() {
    for kind in [
        TransportKind::Stdio,
        TransportKind::Sse,
        TransportKind::StreamableHttp,
    ] {
        assert_eq!(kind.as_str().parse::<TransportKind>().expect("parse"), kind);
    }
}

fn caller_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", HeaderValue::from_static("x"));
    headers.insert("cookie", HeaderValue::from_static("y"));
    headers.insert("mcp-session-id", HeaderValue::from_static("session-1"));
    headers.insert("last-event-id", HeaderValue::from_static("42"));
    headers.insert("user-agent", HeaderValue::from_static("browser"));
    headers
}

#[test]
fn sse_forwards_only_authorization() {
    let out = forwarded_headers(TransportKind::Sse, &caller_headers());
    assert_eq!(out.len(), 2);
    assert_eq!(out.get("authorization").unwrap(), "x");
    assert_eq!(out.get("accept").unwrap(), "text/event-stream");
    assert!(out.get("cookie").is_none());
    assert!(out.get("mcp-session-id").is_none());
}

#[test]
fn streamable_http_forwards_session_and_resume_headers() {
    let out = forwarded_headers(TransportKind::StreamableHttp, &caller_headers());
    assert_eq!(out.len(), 4);
    assert_eq!(out.get("authorization").unwrap(), "x");
    assert_eq!(out.get("mcp-session-id").unwrap(), "session-1");
    assert_eq!(out.get("last-event-id").unwrap(), "42");
    assert_eq!(
        out.get("accept").unwrap(),
        "text/event-stream, application/json"
    );
    assert!(out.get("cookie").is_none());
    assert!(out.get("user-agent").is_none());
}

#[test]
fn multi_valued_header_collapses_to_last_value() {
    let mut caller = HeaderMap::new();
    caller.append("authorization", HeaderValue::from_static("Bearer first"));
    caller.append("authorization", HeaderValue::from_static("Bearer last"));
    let out = forwarded_headers(TransportKind::Sse, &caller);
    let values: Vec<&str> = out
        .get_all("authorization")
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert_eq!(values, vec!["Bearer last"]);
}

#[test]
fn stdio_forwards_no_headers() {
    assert!(forwarded_headers(TransportKind::Stdio, &caller_headers()).is_empty());
}

#[test]
fn environment_layers_in_increasing_precedence() {
    let base = vec![
        ("PATH".to_string(), "/usr/bin".to_string()),
        ("SHARED".to_string(), "process".to_string()),
        ("ONLY_PROCESS".to_string(), "1".to_string()),
    ];
    let defaults = map(&[("SHARED", "default"), ("ONLY_DEFAULT", "2")]);
    let overrides = map(&[("SHARED", "override"), ("PATH", "/opt/bin")]);

    let env = compose_environment(base, &defaults, &overrides);
    assert_eq!(env["SHARED"], "override");
    assert_eq!(env["PATH"], "/opt/bin");
    assert_eq!(env["ONLY_PROCESS"], "1");
    assert_eq!(env["ONLY_DEFAULT"], "2");
}

#[test]
fn unauthorized_establish_error_keeps_status() {
    let err = EstablishError::UpstreamUnauthorized {
        status: 401,
        message: "invalid token".to_string(),
    };
    assert!(err.is_unauthorized());
    assert_eq!(err.status(), 401);
}
