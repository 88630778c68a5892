//! S5 — faulty transports: ~25% of connections get a transport that injects
//! errors, every connection gets exactly one operation, then the whole
//! manager is torn down. Nothing should deadlock or leak a registry entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_cm::config::CmConfig;
use gateway_cm::transport::mock::{FaultyTransport, LoopbackTransport};
use gateway_cm::{Manager, Transport};

fn noop_handler() -> gateway_cm::Handler {
    Arc::new(|_conn, _msg, _err| {})
}

#[tokio::test]
async fn s5_faulty_transports_no_deadlock() {
    let manager = Manager::new(&CmConfig::default());
    let mut registered = Vec::with_capacity(1000);

    for i in 0..1000u64 {
        let transport: Arc<dyn Transport> = if i % 4 == 0 {
            Arc::new(FaultyTransport::new(2))
        } else {
            Arc::new(LoopbackTransport::new())
        };
        let conn = manager
            .register_streaming(
                format!("faulty{i}"),
                transport.clone(),
                noop_handler(),
                HashMap::new(),
            )
            .expect("register succeeds");
        registered.push((transport, conn));
    }

    let mut tasks = Vec::with_capacity(registered.len());
    for (i, (_, conn)) in registered.iter().enumerate() {
        let conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            // One operation per connection; any outcome (success or a
            // surfaced error) is acceptable — the scenario only asserts
            // absence of deadlock and a clean final teardown.
            if i % 2 == 0 {
                let _ = conn.send("probe").await;
            } else {
                let _ = conn.request("probe", Some(Duration::from_millis(50))).await;
            }
        }));
    }
    for task in tasks {
        let _ = task.await;
    }

    manager.close().await;

    assert_eq!(manager.count(), 0);
    for (transport, _) in &registered {
        assert!(transport.is_closed());
    }
}
