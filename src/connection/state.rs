use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::Notify;

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

type OnClosed = Box<dyn FnOnce() + Send>;

/// Atomic backing store for the Connection state machine, plus the
/// completion latch [`wait`](ConnState::wait) blocks on.
///
/// `Open -> Closing` is a single CAS so concurrent `close()` callers coalesce
/// onto exactly one winner; `Closing -> Closed` is driven by
/// [`mark_closed`](ConnState::mark_closed) once both loops have exited.
pub struct ConnState {
    value: AtomicU8,
    closed_notify: Notify,
    on_closed: Mutex<Option<OnClosed>>,
}

impl std::fmt::Debug for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnState")
            .field("value", &self.value.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ConnState {
    pub fn new() -> Self {
        Self {
            value: AtomicU8::new(OPEN),
            closed_notify: Notify::new(),
            on_closed: Mutex::new(None),
        }
    }

    /// Registers the callback that deregisters this connection from
    /// whichever registry it was inserted into. Invoked exactly once,
    /// synchronously, from [`mark_closed`](Self::mark_closed) — by the time
    /// any `wait()` caller observes `Closed`, deregistration has already
    /// happened.
    pub fn set_on_closed(&self, f: impl FnOnce() + Send + 'static) {
        *self.on_closed.lock().unwrap() = Some(Box::new(f));
    }

    pub fn is_open(&self) -> bool {
        self.value.load(Ordering::Acquire) == OPEN
    }

    pub fn is_closed(&self) -> bool {
        self.value.load(Ordering::Acquire) == CLOSED
    }

    /// Attempts the `Open -> Closing` transition. Returns `true` only for the
    /// caller that actually performed it; every other concurrent caller
    /// (including ones arriving after the transition already happened) gets
    /// `false` and should just await `wait()`.
    pub fn begin_closing(&self) -> bool {
        self.value
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Marks the terminal `Closed` state and wakes every `wait()`er. Called
    /// once both the send and receive loops (or the single oneshot delivery)
    /// have exited.
    pub fn mark_closed(&self) {
        self.value.store(CLOSED, Ordering::Release);
        if let Some(f) = self.on_closed.lock().unwrap().take() {
            f();
        }
        self.closed_notify.notify_waiters();
    }

    pub async fn wait(&self) {
        loop {
            if self.is_closed() {
                return;
            }
            // Register interest before re-checking to avoid the classic
            // check-then-notify race: if mark_closed() fires between our
            // is_closed() check and notified(), the Notify permit it left
            // behind still wakes us.
            let notified = self.closed_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ConnState {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts down from `total` and marks `state` `Closed` exactly once the last
/// participant (a send loop, a receive loop, the single oneshot delivery)
/// checks in.
pub struct CompletionLatch {
    remaining: std::sync::atomic::AtomicUsize,
}

impl CompletionLatch {
    pub fn new(total: usize) -> Self {
        Self {
            remaining: std::sync::atomic::AtomicUsize::new(total),
        }
    }

    /// One participant checks in against `state`. The participant that
    /// decrements the counter to zero marks the connection `Closed`.
    pub fn check_in(&self, state: &ConnState) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            state.mark_closed();
        }
    }
}
