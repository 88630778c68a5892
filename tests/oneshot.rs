//! S6 — the oneshot (long-polling) connection variant.

use std::collections::HashMap;
use std::sync::Arc;

use gateway_cm::config::CmConfig;
use gateway_cm::transport::mock::OneshotTestTransport;
use gateway_cm::{ConnError, Manager};

#[tokio::test]
async fn s6_oneshot_delivers_once_then_closes() {
    let manager = Manager::new(&CmConfig::default());
    let (transport, rx) = OneshotTestTransport::new();
    let conn = manager
        .register_oneshot("poller1", Arc::new(transport), HashMap::new())
        .expect("register succeeds");

    assert!(conn.send("hello").await.is_ok());

    let delivered = rx.await.expect("the single slot was filled");
    assert_eq!(&delivered[..], b"hello");

    conn.wait().await;
    assert!(conn.is_closed());
    assert!(manager.get(conn.id()).is_none(), "closed oneshot connection deregisters itself");

    let err = conn.request("again", None).await.unwrap_err();
    assert_eq!(err, ConnError::Closed);

    let err = conn.send("again").await.unwrap_err();
    assert_eq!(err, ConnError::Closed);
}

#[tokio::test]
async fn oneshot_request_before_close_is_unsupported() {
    let manager = Manager::new(&CmConfig::default());
    let (transport, _rx) = OneshotTestTransport::new();
    let conn = manager
        .register_oneshot("poller2", Arc::new(transport), HashMap::new())
        .expect("register succeeds");

    let err = conn.request("too soon", None).await.unwrap_err();
    assert_eq!(err, ConnError::Unsupported);

    manager.close().await;
}
