//! Wire-level message representation exchanged between a [`Connection`] and
//! its [`Transport`](crate::transport::Transport).

use std::time::Instant;

use bytes::Bytes;

/// Monotonically increasing id correlating a `Request` with its `Response`,
/// scoped to a single connection's lifetime. Never reused within that
/// lifetime.
pub type CorrelationId = u64;

/// The three frame kinds a [`Transport`](crate::transport::Transport) carries.
///
/// `Async` frames have no correlation id; `Request`/`Response` frames always
/// do — enforced by [`Message::new_async`]/[`Message::new_request`]/
/// [`Message::new_response`] rather than by the type itself, to keep the
/// wire struct flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum Kind {
    Async,
    Request,
    Response,
}

/// A single frame, either inbound (from [`Transport::recv`](crate::transport::Transport::recv))
/// or outbound (queued for [`Transport::send`](crate::transport::Transport::send)).
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: Kind,
    pub id: Option<CorrelationId>,
    pub payload: Bytes,
    pub ts: Instant,
}

impl Message {
    pub fn new_async(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: Kind::Async,
            id: None,
            payload: payload.into(),
            ts: Instant::now(),
        }
    }

    pub fn new_request(id: CorrelationId, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: Kind::Request,
            id: Some(id),
            payload: payload.into(),
            ts: Instant::now(),
        }
    }

    pub fn new_response(id: CorrelationId, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: Kind::Response,
            id: Some(id),
            payload: payload.into(),
            ts: Instant::now(),
        }
    }
}
