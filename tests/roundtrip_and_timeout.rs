//! S1 (roundtrip) and S2 (request timeout).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_cm::config::CmConfig;
use gateway_cm::transport::mock::LoopbackTransport;
use gateway_cm::{ConnError, Kind, Manager, Message};

fn noop_handler() -> gateway_cm::Handler {
    Arc::new(|_conn, _msg, _err| {})
}

/// A handler that actually exercises the dispatch path S1 describes: on an
/// inbound `Request`, reply through `conn.response(id, payload)` rather than
/// relying on the transport to echo anything back itself.
fn echoing_handler() -> gateway_cm::Handler {
    Arc::new(|conn, msg, _err| {
        let Some(msg) = msg else { return };
        if msg.kind != Kind::Request {
            return;
        }
        let Some(id) = msg.id else { return };
        let payload = msg.payload.clone();
        tokio::spawn(async move {
            let _ = conn.response(id, payload).await;
        });
    })
}

#[tokio::test]
async fn s1_roundtrip() {
    let manager = Manager::new(&CmConfig::default());
    let transport = Arc::new(LoopbackTransport::new());
    let conn = manager
        .register_streaming("dev1", transport, noop_handler(), HashMap::new())
        .expect("register succeeds");

    let reply = conn
        .request("ping", Some(Duration::from_secs(2)))
        .await
        .expect("echoed response");
    assert_eq!(&reply[..], b"ping");

    manager.close().await;
    assert_eq!(manager.count(), 0);
}

#[tokio::test]
async fn s1_handler_dispatches_response_to_inbound_request() {
    let manager = Manager::new(&CmConfig::default());
    let transport = Arc::new(LoopbackTransport::new());
    let conn = manager
        .register_streaming(
            "dev1-handler",
            transport.clone(),
            echoing_handler(),
            HashMap::new(),
        )
        .expect("register succeeds");

    transport.push_inbound(&Message::new_request(42, "inbound-payload"));

    // Give the receive loop a chance to dispatch to the handler, and the
    // handler's spawned task a chance to enqueue the response.
    let mut sent = Vec::new();
    for _ in 0..50 {
        sent = transport.sent();
        if !sent.is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, Kind::Response);
    assert_eq!(sent[0].id, Some(42));
    assert_eq!(&sent[0].payload[..], b"inbound-payload");

    manager.close().await;
}

#[tokio::test]
async fn s2_request_timeout() {
    let manager = Manager::new(&CmConfig::default());
    let transport = Arc::new(LoopbackTransport::dropping());
    let conn = manager
        .register_streaming("dev2", transport, noop_handler(), HashMap::new())
        .expect("register succeeds");

    let started = tokio::time::Instant::now();
    let result = conn.request("x", Some(Duration::from_millis(100))).await;
    let elapsed = started.elapsed();

    assert_eq!(result.unwrap_err(), ConnError::RequestTimeout);
    assert!(
        elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(400),
        "timeout fired outside the expected window: {elapsed:?}"
    );
    assert_eq!(conn.pending_request_count(), 0);

    manager.close().await;
}
