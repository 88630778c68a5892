//! Transport adapter: a thin façade over whatever carries bytes in and out of
//! a device connection (a websocket-like socket, a long-poll response slot,
//! or — in tests — an in-memory mock).
//!
//! The Connection never looks past this trait; adding a new carrier means
//! writing one `impl Transport` and nothing else.

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

/// Capability set a [`Connection`](crate::connection::Connection) requires
/// from its underlying carrier.
///
/// Object-safe by design (`Box<dyn Transport>`): a Connection is constructed
/// once with a transport of whichever concrete kind its acceptor built, and
/// never needs to know which one it got.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one frame. May block up to the caller's write timeout.
    async fn send(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Waits for the next inbound frame, or returns `Timeout` once `deadline`
    /// elapses without one arriving.
    async fn recv(&self, deadline: Instant) -> Result<Bytes, TransportError>;

    /// Idempotent. After this returns, every subsequent `send`/`recv` must
    /// fail with [`TransportError::Closed`].
    async fn close(&self);

    fn is_closed(&self) -> bool;
}
