//! The sharded connection table. A fixed, power-of-two array of
//! [`Shard`]s, each independently mutex-guarded; no two shard locks are ever
//! held at once, so registration/lookup/removal on different connections
//! never contend regardless of how many connections are live.

use std::hash::BuildHasher;

use ahash::RandomState;

use crate::connection::{Connection, ConnId};
use crate::error::ShardError;
use crate::shard::Shard;

pub struct Registry {
    shards: Vec<Shard>,
    mask: u64,
    hash_builder: RandomState,
}

impl Registry {
    /// `n_shards` must be a power of two — callers go through
    /// [`CmConfig`](crate::config::CmConfig), which validates this at load
    /// time, so this constructor just asserts it as an invariant.
    ///
    /// The hash seed is fixed once per `Registry` instance (via
    /// [`ahash::RandomState::new`], which draws from process-local entropy)
    /// rather than per-process: every connection id routes to the same
    /// shard for the life of this registry, but two `Registry` instances
    /// (e.g. across tests) never share a fixed, guessable seed.
    pub fn new(n_shards: usize, init_shard_size: usize) -> Self {
        assert!(n_shards.is_power_of_two(), "n_shards must be a power of two");
        let shards = (0..n_shards).map(|_| Shard::new(init_shard_size)).collect();
        Self {
            shards,
            mask: (n_shards - 1) as u64,
            hash_builder: RandomState::new(),
        }
    }

    fn shard_for(&self, id: &ConnId) -> &Shard {
        &self.shards[(self.hash(id) & self.mask) as usize]
    }

    fn hash(&self, id: &ConnId) -> u64 {
        self.hash_builder.hash_one(id.as_str())
    }

    pub fn insert(&self, id: ConnId, conn: std::sync::Arc<Connection>) -> Result<(), ShardError> {
        self.shard_for(&id).insert(id, conn)
    }

    pub fn remove(&self, id: &ConnId) -> Option<std::sync::Arc<Connection>> {
        self.shard_for(id).remove(id)
    }

    pub fn get(&self, id: &ConnId) -> Option<std::sync::Arc<Connection>> {
        self.shard_for(id).get(id)
    }

    /// Total connections across every shard. Not a single atomic counter by
    /// design — summing per-shard sizes avoids a hot shared counter every
    /// insert/remove would have to contend on.
    pub fn count(&self) -> usize {
        self.shards.iter().map(Shard::size).sum()
    }

    pub fn n_shards(&self) -> usize {
        self.shards.len()
    }

    /// Snapshots every connection in every shard. Used by the
    /// [`Manager`](crate::manager::Manager) to broadcast `close()` without
    /// holding any shard lock across the subsequent awaits.
    pub fn snapshot_all(&self) -> Vec<std::sync::Arc<Connection>> {
        self.shards.iter().flat_map(Shard::snapshot).collect()
    }

    pub fn for_each(&self, mut f: impl FnMut(&std::sync::Arc<Connection>)) {
        for shard in &self.shards {
            shard.for_each(&mut f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two() {
        let result = std::panic::catch_unwind(|| Registry::new(3, 8));
        assert!(result.is_err());
    }

    #[test]
    fn empty_registry_counts_zero() {
        let reg = Registry::new(8, 4);
        assert_eq!(reg.count(), 0);
        assert_eq!(reg.n_shards(), 8);
    }

    #[test]
    fn same_id_always_routes_to_same_shard() {
        let reg = Registry::new(16, 4);
        let id = ConnId::from("stable-id".to_string());
        let a = reg.shard_for(&id) as *const Shard;
        let b = reg.shard_for(&id) as *const Shard;
        assert_eq!(a, b);
    }
}
