//! The full-duplex Connection variant: a send loop, a receive loop, and the
//! request/response correlation table layered over them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc, oneshot};

use super::state::{CompletionLatch, ConnState};
use super::{Connection, ConnId, Meta, Variant};
use crate::error::ConnError;
use crate::handler::Handler;
use crate::message::{CorrelationId, Kind, Message};
use crate::transport::Transport;
use crate::wire;

/// Tuning knobs a streaming Connection needs from [`CmConfig`](crate::config::CmConfig).
#[derive(Clone, Copy, Debug)]
pub struct StreamingTimeouts {
    pub write: Duration,
    pub read: Duration,
    pub request_default: Duration,
    pub response: Duration,
}

type PendingMap = Mutex<HashMap<CorrelationId, oneshot::Sender<Result<Bytes, ConnError>>>>;

pub struct Streaming {
    transport: Arc<dyn Transport>,
    handler: Handler,
    send_tx: mpsc::Sender<Message>,
    pending: PendingMap,
    next_id: AtomicU64,
    close_notify: Notify,
    latch: CompletionLatch,
    timeouts: StreamingTimeouts,
}

impl Streaming {
    pub fn send(&self, state: &ConnState, payload: impl Into<Bytes>) -> Result<(), ConnError> {
        if !state.is_open() {
            return Err(ConnError::Closed);
        }
        let msg = Message::new_async(payload.into());
        self.send_tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => ConnError::QueueFull,
            TrySendError::Closed(_) => ConnError::Closed,
        })
    }

    pub async fn request(
        &self,
        state: &ConnState,
        payload: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<Bytes, ConnError> {
        if !state.is_open() {
            return Err(ConnError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let msg = Message::new_request(id, payload.into());
        if let Err(e) = self.send_tx.try_send(msg) {
            self.pending.lock().unwrap().remove(&id);
            return Err(match e {
                TrySendError::Full(_) => ConnError::QueueFull,
                TrySendError::Closed(_) => ConnError::Closed,
            });
        }

        let timeout = timeout.unwrap_or(self.timeouts.request_default);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without sending: treat the same as a cancellation.
            Ok(Err(_)) => {
                self.pending.lock().unwrap().remove(&id);
                Err(ConnError::Closed)
            }
            Err(_elapsed) => {
                self.pending.lock().unwrap().remove(&id);
                Err(ConnError::RequestTimeout)
            }
        }
    }

    pub async fn response(
        &self,
        state: &ConnState,
        id: CorrelationId,
        payload: impl Into<Bytes>,
    ) -> Result<(), ConnError> {
        if !state.is_open() {
            return Err(ConnError::Closed);
        }
        let msg = Message::new_response(id, payload.into());
        match tokio::time::timeout(self.timeouts.response, self.send_tx.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ConnError::Closed),
            Err(_elapsed) => Err(ConnError::QueueFull),
        }
    }

    pub fn pending_request_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Performs the `Open -> Closing` side effects exactly once: closes the
    /// transport (which unblocks the receive loop with `Closed`), cancels
    /// every pending waiter, and wakes the send loop out of its select.
    pub async fn initiate_close(&self, state: &ConnState) {
        if !state.begin_closing() {
            return;
        }
        self.transport.close().await;
        let cancelled: Vec<_> = self.pending.lock().unwrap().drain().collect();
        for (_, tx) in cancelled {
            let _ = tx.send(Err(ConnError::Closed));
        }
        self.close_notify.notify_waiters();
    }
}

/// Registers a new streaming connection: builds the Connection, spawns its
/// send and receive loops, and returns the shared handle both the caller and
/// the loops hold.
pub fn spawn(
    id: ConnId,
    meta: Meta,
    transport: Arc<dyn Transport>,
    handler: Handler,
    queue_size: usize,
    timeouts: StreamingTimeouts,
) -> Arc<Connection> {
    let (send_tx, send_rx) = mpsc::channel(queue_size.max(1));

    let streaming = Streaming {
        transport,
        handler,
        send_tx,
        pending: Mutex::new(HashMap::new()),
        next_id: AtomicU64::new(0),
        close_notify: Notify::new(),
        latch: CompletionLatch::new(2),
        timeouts,
    };

    let conn = Arc::new(Connection {
        id,
        meta,
        created_at: Instant::now(),
        closed_at: Mutex::new(None),
        state: ConnState::new(),
        variant: Variant::Streaming(streaming),
    });

    tokio::spawn(send_loop(conn.clone(), send_rx));
    tokio::spawn(recv_loop(conn.clone()));

    conn
}

fn streaming_of(conn: &Connection) -> &Streaming {
    match &conn.variant {
        Variant::Streaming(s) => s,
        Variant::Oneshot(_) => unreachable!("send_loop/recv_loop only spawned for streaming connections"),
    }
}

async fn send_loop(conn: Arc<Connection>, mut rx: mpsc::Receiver<Message>) {
    let s = streaming_of(&conn);
    loop {
        tokio::select! {
            biased;
            _ = s.close_notify.notified() => break,
            maybe_msg = rx.recv() => {
                match maybe_msg {
                    None => break,
                    Some(msg) => {
                        let encoded = wire::encode(&msg);
                        match tokio::time::timeout(s.timeouts.write, s.transport.send(encoded)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) => {
                                s.initiate_close(&conn.state).await;
                                break;
                            }
                            Err(_elapsed) => {
                                s.initiate_close(&conn.state).await;
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
    // Drain and discard whatever is still queued — "the send queue is
    // drained or discarded before Closed".
    while rx.try_recv().is_ok() {}
    s.latch.check_in(&conn.state);
}

async fn recv_loop(conn: Arc<Connection>) {
    loop {
        let s = streaming_of(&conn);
        let deadline = Instant::now() + s.timeouts.read;
        match s.transport.recv(deadline).await {
            Ok(raw) => {
                let Some(msg) = wire::decode(&raw) else {
                    // Malformed frame: not specified, treat as noise rather
                    // than tearing down the connection over it.
                    continue;
                };
                match msg.kind {
                    Kind::Response => {
                        if let Some(id) = msg.id {
                            let waiter = s.pending.lock().unwrap().remove(&id);
                            if let Some(tx) = waiter {
                                let _ = tx.send(Ok(msg.payload));
                            }
                            // else: late response after timeout — discard.
                        }
                    }
                    Kind::Request | Kind::Async => {
                        (s.handler)(conn.clone(), Some(msg), None);
                    }
                }
            }
            Err(err) => {
                (s.handler)(conn.clone(), None, Some(err));
                s.initiate_close(&conn.state).await;
                break;
            }
        }
    }
    let s = streaming_of(&conn);
    s.latch.check_in(&conn.state);
}
