//! One bucket of the sharded connection table. A `Shard` is independently
//! mutex-guarded so the `Registry` never has to hold more than one shard's
//! lock at a time, and never holds a shard lock across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::connection::{Connection, ConnId};
use crate::error::ShardError;

pub struct Shard {
    table: Mutex<HashMap<ConnId, Arc<Connection>>>,
}

impl Shard {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Inserts `conn` under `id`. Fails if `id` is already present — ids are
    /// assumed globally unique, so a collision means the caller (or its
    /// id generator) is misbehaving, not a benign race.
    pub fn insert(&self, id: ConnId, conn: Arc<Connection>) -> Result<(), ShardError> {
        let mut table = self.table.lock().unwrap();
        if table.contains_key(&id) {
            return Err(ShardError::Duplicate);
        }
        table.insert(id, conn);
        Ok(())
    }

    pub fn remove(&self, id: &ConnId) -> Option<Arc<Connection>> {
        self.table.lock().unwrap().remove(id)
    }

    pub fn get(&self, id: &ConnId) -> Option<Arc<Connection>> {
        self.table.lock().unwrap().get(id).cloned()
    }

    pub fn size(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    /// Snapshots every connection currently in this shard and hands the
    /// caller an owned `Vec` — never a guard held across an await point, so
    /// callers are free to `.await` per element (e.g. `conn.close()`).
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.table.lock().unwrap().values().cloned().collect()
    }

    /// Runs `f` against a snapshot of this shard's connections. `f` itself
    /// never executes under the shard lock.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Connection>)) {
        for conn in self.snapshot() {
            f(&conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::streaming::{self, StreamingTimeouts};
    use crate::transport::mock::LoopbackTransport;
    use std::time::Duration;

    fn fake_conn(id: &str) -> (ConnId, Arc<Connection>) {
        let conn_id = ConnId::from(id.to_string());
        let conn = streaming::spawn(
            conn_id.clone(),
            Arc::new(HashMap::new()),
            Arc::new(LoopbackTransport::new()),
            Arc::new(|_, _, _| {}),
            8,
            StreamingTimeouts {
                write: Duration::from_secs(1),
                read: Duration::from_secs(1),
                request_default: Duration::from_secs(1),
                response: Duration::from_secs(1),
            },
        );
        (conn_id, conn)
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let shard = Shard::new(4);
        let (id, conn) = fake_conn("a");
        shard.insert(id.clone(), conn.clone()).unwrap();
        let err = shard.insert(id, conn).unwrap_err();
        assert_eq!(err, ShardError::Duplicate);
    }

    #[tokio::test]
    async fn remove_and_get_round_trip() {
        let shard = Shard::new(4);
        let (id, conn) = fake_conn("b");
        shard.insert(id.clone(), conn).unwrap();
        assert!(shard.get(&id).is_some());
        assert_eq!(shard.size(), 1);
        assert!(shard.remove(&id).is_some());
        assert!(shard.get(&id).is_none());
        assert_eq!(shard.size(), 0);
    }

    #[tokio::test]
    async fn for_each_visits_every_entry() {
        let shard = Shard::new(4);
        for i in 0..5 {
            let (id, conn) = fake_conn(&format!("c{i}"));
            shard.insert(id, conn).unwrap();
        }
        let mut seen = 0;
        shard.for_each(|_| seen += 1);
        assert_eq!(seen, 5);
    }
}
