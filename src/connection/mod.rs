//! Per-client connection state machine.
//!
//! [`Connection`] is the unit the rest of the crate operates on: the
//! [`Registry`](crate::registry::Registry) stores `Arc<Connection>`, the
//! [`Manager`](crate::manager::Manager) constructs and tears them down, and
//! the user [`Handler`](crate::handler::Handler) receives one per inbound
//! frame. It has two concrete flavors — [`streaming`] (full-duplex) and
//! [`oneshot`] (single response, for long-polled clients) — unified behind
//! one public API so callers never need to match on which kind they got.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use bytes::Bytes;

use crate::error::ConnError;
use crate::message::CorrelationId;

mod state;
pub mod oneshot;
pub mod streaming;

use state::ConnState;

/// Opaque connection id, unique across a [`Registry`](crate::registry::Registry)
/// at any instant.
///
/// Wraps `Arc<str>` rather than `String` so the many places that need to
/// carry an id across a task boundary (the registry, both loops, every
/// waiter) can clone it for the price of a refcount bump.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ConnId(Arc<str>);

impl ConnId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnId({:?})", self.0)
    }
}

impl<T: Into<Arc<str>>> From<T> for ConnId {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// Opaque key/value bag attached at registration, immutable afterward.
pub type Meta = Arc<HashMap<String, String>>;

enum Variant {
    Streaming(streaming::Streaming),
    Oneshot(oneshot::Oneshot),
}

/// A single registered client connection.
///
/// Always held behind `Arc<Connection>` — it is handed to the user
/// [`Handler`](crate::handler::Handler) on every inbound frame and shared
/// between its own send/receive loops and whichever external tasks call
/// `send`/`request`/`response`/`close` concurrently.
pub struct Connection {
    id: ConnId,
    meta: Meta,
    created_at: Instant,
    closed_at: Mutex<Option<Instant>>,
    state: ConnState,
    variant: Variant,
}

impl Connection {
    pub fn id(&self) -> &ConnId {
        &self.id
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn closed_at(&self) -> Option<Instant> {
        *self.closed_at.lock().unwrap()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Enqueues an `Async` frame. For a streaming connection this is
    /// non-blocking: fails fast with `QueueFull`/`Closed` rather than waiting
    /// for room. For a oneshot connection this performs the single delivery
    /// and closes the connection.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), ConnError> {
        match &self.variant {
            Variant::Streaming(s) => s.send(&self.state, payload),
            Variant::Oneshot(o) => o.send(&self.state, payload).await,
        }
    }

    /// Sends a `Request` frame and awaits the matching `Response`, or
    /// `timeout` (falling back to the connection's configured default),
    /// whichever comes first.
    pub async fn request(
        &self,
        payload: impl Into<Bytes>,
        timeout: Option<std::time::Duration>,
    ) -> Result<Bytes, ConnError> {
        match &self.variant {
            Variant::Streaming(s) => s.request(&self.state, payload, timeout).await,
            Variant::Oneshot(_) => Err(self.unsupported_or_closed()),
        }
    }

    /// Replies to the inbound request tagged `id` (taken from the `Message`
    /// the handler was invoked with).
    pub async fn response(
        &self,
        id: CorrelationId,
        payload: impl Into<Bytes>,
    ) -> Result<(), ConnError> {
        match &self.variant {
            Variant::Streaming(s) => s.response(&self.state, id, payload).await,
            Variant::Oneshot(_) => Err(self.unsupported_or_closed()),
        }
    }

    /// A oneshot connection never supports `request`/`response`; once it has
    /// transitioned out of `Open` report `Closed` instead so callers can tell
    /// "wrong connection kind" apart from "connection gone" the same way a
    /// streaming connection's other methods do.
    fn unsupported_or_closed(&self) -> ConnError {
        if self.state.is_open() {
            ConnError::Unsupported
        } else {
            ConnError::Closed
        }
    }

    /// Begins closing the connection. Idempotent — concurrent callers
    /// coalesce onto whichever one wins the `Open -> Closing` transition.
    /// Returns once the transition has been initiated, not once the
    /// connection has fully drained; call [`wait`](Self::wait) for that.
    pub async fn close(self: &Arc<Self>) {
        match &self.variant {
            Variant::Streaming(s) => s.initiate_close(&self.state).await,
            Variant::Oneshot(o) => o.initiate_close(&self.state).await,
        }
    }

    /// Blocks until the connection has fully transitioned to `Closed` (both
    /// loops exited, or the single oneshot delivery completed).
    pub async fn wait(&self) {
        self.state.wait().await;
        if self.closed_at.lock().unwrap().is_none() {
            *self.closed_at.lock().unwrap() = Some(Instant::now());
        }
    }

    /// Registers the callback that removes this connection from whichever
    /// registry inserted it, run once `Closed` is reached. Crate-internal:
    /// only the [`Manager`](crate::manager::Manager) that owns the registry
    /// this connection lives in calls this, right after insertion.
    pub(crate) fn set_on_closed(&self, f: impl FnOnce() + Send + 'static) {
        self.state.set_on_closed(f);
    }

    /// Number of requests still awaiting a response. `0` for oneshot
    /// connections and for any connection past `Closed`.
    pub fn pending_request_count(&self) -> usize {
        match &self.variant {
            Variant::Streaming(s) => s.pending_request_count(),
            Variant::Oneshot(_) => 0,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}
