//! Process-wide (or per-test) connection lifecycle coordinator: owns the
//! [`Registry`], constructs Connections on `register`, and drives the
//! two-phase broadcast shutdown on `close`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::CmConfig;
use crate::connection::streaming::StreamingTimeouts;
use crate::connection::{Connection, ConnId, oneshot, streaming};
use crate::error::ManagerError;
use crate::handler::Handler;
use crate::registry::Registry;
use crate::transport::Transport;

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

static GLOBAL: OnceLock<Arc<Manager>> = OnceLock::new();

/// Owns the connection [`Registry`] and arbitrates its lifecycle.
///
/// Primarily an explicit handle: construct with [`Manager::new`] and thread
/// the `Arc<Manager>` to whatever accepts connections, which keeps tests
/// (and anything else that wants more than one instance in a process, e.g.
/// multiple listeners) free of shared global state. [`Manager::init_global`]
/// / [`Manager::global`] layer a process-wide convenience singleton on top,
/// the same `OnceLock`-backed shape this codebase uses for its own
/// connection registry.
pub struct Manager {
    registry: Registry,
    state: AtomicU8,
    drained: Notify,
    streaming_timeouts: StreamingTimeouts,
    send_queue_size: usize,
    long_polling_timeout: std::time::Duration,
    // Lets `insert` hand each Connection a deregistration callback without
    // needing callers to pass the `Arc<Manager>` back in. Set once, right
    // after construction; every `Manager` method that reads it runs after
    // `new` has returned, so the `expect` in `insert` never fires.
    self_weak: OnceLock<Weak<Manager>>,
    // Serializes "check Running, then insert" (in `insert`) against "CAS to
    // Draining, then snapshot" (in `close`). Without it the two race: a
    // register call can observe Running and insert after close has already
    // taken its snapshot, leaving a connection permanently in the registry
    // that close() never waits on. Both sides only ever do plain sync work
    // under this lock, never an `.await`.
    lifecycle: std::sync::Mutex<()>,
}

impl Manager {
    pub fn new(config: &CmConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            registry: Registry::new(config.n_shards, config.init_shard_size),
            state: AtomicU8::new(RUNNING),
            drained: Notify::new(),
            streaming_timeouts: StreamingTimeouts {
                write: config.websocket.timeouts.write,
                read: config.websocket.timeouts.read,
                request_default: config.websocket.timeouts.request,
                response: config.websocket.timeouts.response,
            },
            send_queue_size: config.websocket.request_queue_size,
            long_polling_timeout: config.http.timeouts.long_polling,
            self_weak: OnceLock::new(),
            lifecycle: std::sync::Mutex::new(()),
        });
        let _ = manager.self_weak.set(Arc::downgrade(&manager));
        manager
    }

    /// Installs `Manager::new(config)` as the process-wide instance. Fails
    /// with `Err::AlreadyInitialized` if one is already live.
    pub fn init_global(config: &CmConfig) -> Result<Arc<Self>, ManagerError> {
        let manager = Self::new(config);
        GLOBAL
            .set(manager.clone())
            .map_err(|_| ManagerError::AlreadyInitialized)?;
        Ok(manager)
    }

    pub fn global() -> Result<Arc<Self>, ManagerError> {
        GLOBAL.get().cloned().ok_or(ManagerError::NotInitialized)
    }

    fn ensure_running(&self) -> Result<(), ManagerError> {
        if self.state.load(Ordering::Acquire) != RUNNING {
            return Err(ManagerError::Closed);
        }
        Ok(())
    }

    /// Registers a full-duplex connection: builds it, inserts it into the
    /// registry, and launches its send/receive loops.
    pub fn register_streaming(
        &self,
        id: impl Into<ConnId>,
        transport: Arc<dyn Transport>,
        handler: Handler,
        meta: HashMap<String, String>,
    ) -> Result<Arc<Connection>, ManagerError> {
        self.ensure_running()?;
        let id = id.into();
        let conn = streaming::spawn(
            id.clone(),
            Arc::new(meta),
            transport,
            handler,
            self.send_queue_size,
            self.streaming_timeouts,
        );
        self.insert(id, conn)
    }

    /// Registers a single-delivery connection (long-polled HTTP-style
    /// client). No handler — there is no inbound frame to dispatch.
    pub fn register_oneshot(
        &self,
        id: impl Into<ConnId>,
        transport: Arc<dyn Transport>,
        meta: HashMap<String, String>,
    ) -> Result<Arc<Connection>, ManagerError> {
        self.ensure_running()?;
        let id = id.into();
        let conn = oneshot::spawn(id.clone(), Arc::new(meta), transport, self.long_polling_timeout);
        self.insert(id, conn)
    }

    /// Checks `Running` and inserts into the registry as one atomic step
    /// with respect to `close()`'s CAS+snapshot (both hold `lifecycle`), so
    /// a connection can never be inserted after `close()` has already taken
    /// its snapshot of what to drain.
    fn insert(&self, id: ConnId, conn: Arc<Connection>) -> Result<Arc<Connection>, ManagerError> {
        let insert_result: Result<(), ManagerError> = {
            let _guard = self.lifecycle.lock().unwrap();
            match self.ensure_running() {
                Ok(()) => self
                    .registry
                    .insert(id.clone(), conn.clone())
                    .map_err(ManagerError::from),
                Err(e) => Err(e),
            }
        };

        match insert_result {
            Ok(()) => {
                let weak_self = self
                    .self_weak
                    .get()
                    .cloned()
                    .expect("self_weak set in Manager::new");
                let dereg_id = id.clone();
                conn.set_on_closed(move || {
                    if let Some(manager) = weak_self.upgrade() {
                        manager.registry.remove(&dereg_id);
                    }
                });
                info!(connection_id = %id, "connection registered");
                Ok(conn)
            }
            Err(e) => {
                warn!(connection_id = %id, error = %e, "connection rejected");
                // The loops are already spawned; tear the rejected
                // connection down rather than leaking it outside the
                // registry's visibility.
                let conn_for_close = conn;
                tokio::spawn(async move { conn_for_close.close().await });
                Err(e)
            }
        }
    }

    pub fn get(&self, id: &ConnId) -> Option<Arc<Connection>> {
        self.registry.get(id)
    }

    pub fn count(&self) -> usize {
        self.registry.count()
    }

    /// Transitions to `Draining`, closes every registered connection
    /// concurrently, waits for all of them to finish, then empties the
    /// registry and transitions to `Closed`. Idempotent: callers racing on
    /// `close()` all observe the same drain.
    pub async fn close(&self) {
        // Holding `lifecycle` across the CAS and the snapshot makes this
        // atomic with respect to `insert`'s own check-then-insert: either
        // an in-flight register call inserts first and is included in this
        // snapshot, or it observes `Draining` (via `ensure_running`, also
        // taken under `lifecycle`) and never gets in to begin with.
        let connections = {
            let _guard = self.lifecycle.lock().unwrap();
            if self
                .state
                .compare_exchange(RUNNING, DRAINING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                None
            } else {
                Some(self.registry.snapshot_all())
            }
        };

        let connections = match connections {
            Some(connections) => connections,
            None => {
                // Lost the race to drain: wait for whoever won, using the
                // same check-register-recheck shape as ConnState::wait so a
                // drained() fired between our load and notified() isn't
                // missed.
                loop {
                    if self.is_closed() {
                        return;
                    }
                    let notified = self.drained.notified();
                    if self.is_closed() {
                        return;
                    }
                    notified.await;
                }
            }
        };

        info!(count = connections.len(), "manager closing, draining connections");

        let handles: Vec<_> = connections
            .iter()
            .cloned()
            .map(|conn| {
                tokio::spawn(async move {
                    conn.close().await;
                    conn.wait().await;
                })
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
        // Each Connection's own on_closed hook (set in `insert`) already
        // removed it from the registry, synchronously, before its `wait()`
        // resolved above — nothing left to sweep here.
        debug_assert_eq!(self.registry.count(), 0);

        self.state.store(CLOSED, Ordering::Release);
        self.drained.notify_waiters();
        info!("manager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }
}
