//! Invariants 3 (no orphan waiters), 4 (FIFO on the wire), and 5
//! (correlation uniqueness). Counts-consistency and transport-closure ride
//! along with the S4/S5 scenarios; idempotent-close rides along with S3.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_cm::config::CmConfig;
use gateway_cm::transport::mock::LoopbackTransport;
use gateway_cm::{ConnError, Manager};

fn noop_handler() -> gateway_cm::Handler {
    Arc::new(|_conn, _msg, _err| {})
}

#[tokio::test]
async fn no_orphan_waiters_after_close() {
    let manager = Manager::new(&CmConfig::default());
    // A dropping transport so every in-flight `request` is still pending
    // when we close.
    let transport = Arc::new(LoopbackTransport::dropping());
    let conn = manager
        .register_streaming("orphan-check", transport, noop_handler(), HashMap::new())
        .expect("register succeeds");

    let mut waiters = Vec::new();
    for i in 0..8 {
        let conn = conn.clone();
        waiters.push(tokio::spawn(async move {
            conn.request(format!("r{i}"), Some(Duration::from_secs(30)))
                .await
        }));
    }
    // Give every request a chance to register its waiter before closing.
    for _ in 0..50 {
        if conn.pending_request_count() >= 8 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(conn.pending_request_count(), 8);

    conn.close().await;
    conn.wait().await;

    for waiter in waiters {
        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap_err(), ConnError::Closed);
    }
    assert_eq!(conn.pending_request_count(), 0);

    manager.close().await;
}

#[tokio::test]
async fn fifo_single_producer() {
    let manager = Manager::new(&CmConfig::default());
    let transport = Arc::new(LoopbackTransport::new());
    let conn = manager
        .register_streaming("fifo", transport.clone(), noop_handler(), HashMap::new())
        .expect("register succeeds");

    for i in 0..200u32 {
        conn.send(format!("{i}")).await.unwrap();
    }
    // Let the send loop drain the queue.
    for _ in 0..50 {
        if transport.sent().len() == 200 {
            break;
        }
        tokio::task::yield_now().await;
    }

    let sent = transport.sent();
    assert_eq!(sent.len(), 200);
    for (i, msg) in sent.iter().enumerate() {
        assert_eq!(&msg.payload[..], i.to_string().as_bytes());
    }

    manager.close().await;
}

#[tokio::test]
async fn correlation_ids_never_collide_concurrently() {
    let manager = Manager::new(&CmConfig::default());
    let transport = Arc::new(LoopbackTransport::new());
    let conn = manager
        .register_streaming("correlate", transport, noop_handler(), HashMap::new())
        .expect("register succeeds");

    let mut tasks = Vec::with_capacity(100);
    for i in 0..100u32 {
        let conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            let reply = conn
                .request(format!("payload-{i}"), Some(Duration::from_secs(5)))
                .await
                .expect("echoed back");
            (i, reply)
        }));
    }
    for task in tasks {
        let (i, reply) = task.await.unwrap();
        assert_eq!(reply, bytes::Bytes::from(format!("payload-{i}")));
    }

    manager.close().await;
}
