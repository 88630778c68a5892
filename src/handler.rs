//! The user-supplied message handler, invoked serially on a Connection's
//! receive loop for every inbound `Request`/`Async` frame and for the single
//! terminal transport error.

use std::sync::Arc;

use crate::connection::Connection;
use crate::error::TransportError;
use crate::message::Message;

/// `fn(connection, message | None, error | None)` — exactly one of `message`
/// and `error` is `Some` on any given invocation.
///
/// An `Arc<dyn Fn...>` rather than a generic type parameter: the handler is
/// stored in shared Connection state and must be cheap to clone across the
/// receive loop and the task that constructed the Connection.
///
/// Must not block indefinitely (it runs inline on the receive loop, so it
/// backpressures reads against its own throughput) and must not call
/// `connection.close()` synchronously on the same Connection it was invoked
/// for — that would deadlock `wait()` against itself. Spawn the close as a
/// separate task instead.
pub type Handler = Arc<
    dyn Fn(Arc<Connection>, Option<Message>, Option<TransportError>)
        + Send
        + Sync,
>;
