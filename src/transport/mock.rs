//! In-memory `Transport` implementations used by the test suite: a loopback
//! transport that echoes requests back as responses, and a fault-injecting
//! transport that fails on a configurable schedule.
//!
//! Not part of the CM's public contract — gated behind `test-util` precisely
//! because no real acceptor should ever construct one of these.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::message::{Kind, Message};
use crate::transport::Transport;
use crate::wire;

/// A transport with one inbound queue and one outbound record, suitable for
/// driving a single Connection from a test body: push frames the Connection
/// should "receive" with [`LoopbackTransport::push_inbound`], then inspect
/// everything the Connection sent via [`LoopbackTransport::sent`].
///
/// In "echo" mode (the default), every `Request` frame handed to `send` is
/// immediately queued back as an inbound `Response` with the same id and
/// payload — this is what backs scenario S1.
pub struct LoopbackTransport {
    inbound: Mutex<VecDeque<Bytes>>,
    notify: Notify,
    sent: Mutex<Vec<Message>>,
    closed: AtomicBool,
    echo_requests: bool,
    drop_frames: bool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            inbound: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            echo_requests: true,
            drop_frames: false,
        }
    }

    /// A transport that silently drops every frame it is asked to send —
    /// used to drive scenario S2 (`request` timeout).
    pub fn dropping() -> Self {
        Self {
            echo_requests: false,
            drop_frames: true,
            ..Self::new()
        }
    }

    pub fn push_inbound(&self, msg: &Message) {
        self.inbound.lock().unwrap().push_back(wire::encode(msg));
        self.notify.notify_one();
    }

    /// Every `Message` this transport's `send` has ever been called with, in
    /// call order.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if self.drop_frames {
            return Ok(());
        }

        if self.echo_requests {
            if let Some(msg) = wire::decode(&payload) {
                if msg.kind == Kind::Request {
                    if let Some(id) = msg.id {
                        self.push_inbound(&Message::new_response(
                            id,
                            msg.payload.clone(),
                        ));
                    }
                }
            }
        }

        if let Some(msg) = wire::decode(&payload) {
            self.sent.lock().unwrap().push(msg);
        }
        Ok(())
    }

    async fn recv(&self, deadline: Instant) -> Result<Bytes, TransportError> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            if let Some(payload) = self.inbound.lock().unwrap().pop_front() {
                return Ok(payload);
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now())
            else {
                return Err(TransportError::Timeout);
            };
            if tokio::time::timeout(remaining, self.notify.notified())
                .await
                .is_err()
            {
                return Err(TransportError::Timeout);
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A transport that fails a fraction of its `send`/`recv` calls with a
/// configurable error, used to drive scenario S5.
pub struct FaultyTransport {
    inner: LoopbackTransport,
    fail_every: usize,
    calls: AtomicUsize,
}

impl FaultyTransport {
    /// Fails every `fail_every`-th call (both `send` and `recv` share the
    /// counter) with `TransportError::Io`.
    pub fn new(fail_every: usize) -> Self {
        Self {
            inner: LoopbackTransport::new(),
            fail_every: fail_every.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_inbound(&self, msg: &Message) {
        self.inner.push_inbound(msg);
    }

    fn should_fail(&self) -> bool {
        self.calls.fetch_add(1, Ordering::Relaxed) % self.fail_every == 0
    }
}

#[async_trait]
impl Transport for FaultyTransport {
    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        if self.should_fail() {
            return Err(TransportError::Io);
        }
        self.inner.send(payload).await
    }

    async fn recv(&self, deadline: Instant) -> Result<Bytes, TransportError> {
        if self.should_fail() {
            return Err(TransportError::Io);
        }
        self.inner.recv(deadline).await
    }

    async fn close(&self) {
        self.inner.close().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// A single-slot transport backing the oneshot (long-poll) connection
/// variant in tests: one `send` delivers through the slot, everything after
/// fails with `Closed`.
pub struct OneshotTestTransport {
    slot: tokio::sync::Mutex<Option<tokio::sync::oneshot::Sender<Bytes>>>,
    closed: AtomicBool,
}

impl OneshotTestTransport {
    pub fn new() -> (Self, tokio::sync::oneshot::Receiver<Bytes>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (
            Self {
                slot: tokio::sync::Mutex::new(Some(tx)),
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }
}

#[async_trait]
impl Transport for OneshotTestTransport {
    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let sender = self.slot.lock().await.take();
        match sender {
            Some(tx) => {
                let _ = tx.send(payload);
                Ok(())
            }
            None => Err(TransportError::Closed),
        }
    }

    async fn recv(&self, _deadline: Instant) -> Result<Bytes, TransportError> {
        Err(TransportError::Closed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
