//! The oneshot Connection variant, used for long-polled HTTP-style clients:
//! exactly one outbound payload is delivered, after which the connection
//! closes itself. No receive loop, no request/response correlation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::task::JoinHandle;

use super::state::{CompletionLatch, ConnState};
use super::{Connection, ConnId, Meta, Variant};
use crate::error::ConnError;
use crate::transport::Transport;

pub struct Oneshot {
    transport: Arc<dyn Transport>,
    delivered: AtomicBool,
    latch: CompletionLatch,
    deadline_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Oneshot {
    pub async fn send(
        &self,
        state: &ConnState,
        payload: impl Into<Bytes>,
    ) -> Result<(), ConnError> {
        if !state.is_open() {
            return Err(ConnError::Closed);
        }
        if self
            .delivered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConnError::Closed);
        }

        let result = self.transport.send(payload.into()).await;
        self.initiate_close(state).await;
        result.map_err(ConnError::from)
    }

    pub async fn initiate_close(&self, state: &ConnState) {
        if !state.begin_closing() {
            return;
        }
        self.transport.close().await;
        if let Some(handle) = self.deadline_task.lock().unwrap().take() {
            handle.abort();
        }
        self.latch.check_in(state);
    }
}

/// Registers a new oneshot connection and arms its long-poll deadline: if
/// `send` is never called, the connection force-closes after
/// `config.http.timeouts.longPolling`.
pub fn spawn(
    id: ConnId,
    meta: Meta,
    transport: Arc<dyn Transport>,
    long_polling_timeout: Duration,
) -> Arc<Connection> {
    let oneshot = Oneshot {
        transport,
        delivered: AtomicBool::new(false),
        latch: CompletionLatch::new(1),
        deadline_task: std::sync::Mutex::new(None),
    };

    let conn = Arc::new(Connection {
        id,
        meta,
        created_at: Instant::now(),
        closed_at: std::sync::Mutex::new(None),
        state: ConnState::new(),
        variant: Variant::Oneshot(oneshot),
    });

    let deadline_conn = conn.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(long_polling_timeout).await;
        deadline_conn.close().await;
    });
    if let Variant::Oneshot(o) = &conn.variant {
        *o.deadline_task.lock().unwrap() = Some(handle);
    }

    conn
}
