//! The immutable cluster snapshot: `{version, slot_map, pools}`.
//!
//! A snapshot is never mutated in place. The monitor builds a whole new one
//! on every successful `CLUSTER SLOTS` reconciliation and publishes it behind
//! an `Arc`; every in-flight request holds its own `Arc<Snapshot>` clone plus
//! the `version` it observed, so routing decisions made mid-refresh stay
//! internally consistent.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::NodeAddr;
use crate::pool::{PoolId, WorkerPool};
use crate::slot::NUM_SLOTS;

/// Immutable `{version, slot_map, pools}` tuple published by the monitor.
pub struct Snapshot {
    pub version: u64,
    /// One `PoolId` per hash slot. Populated entirely for a healthy cluster;
    /// a slot left unassigned (gap in `CLUSTER SLOTS` coverage) routes to
    /// `None` and surfaces as `NoConnection` to force a refresh.
    slot_map: Box<[Option<PoolId>; NUM_SLOTS]>,
    pools: HashMap<PoolId, Arc<WorkerPool>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            slot_map: Box::new([None; NUM_SLOTS]),
            pools: HashMap::new(),
        }
    }

    pub fn builder(version: u64) -> SnapshotBuilder {
        SnapshotBuilder {
            version,
            slot_map: Box::new([None; NUM_SLOTS]),
            pools: HashMap::new(),
        }
    }

    pub fn pool_for_slot(&self, slot: u16) -> Option<Arc<WorkerPool>> {
        let pool_id = (*self.slot_map.get(slot as usize)?)?;
        self.pools.get(&pool_id).cloned()
    }

    pub fn pool_id_for_slot(&self, slot: u16) -> Option<PoolId> {
        *self.slot_map.get(slot as usize)?
    }

    pub fn pool(&self, id: PoolId) -> Option<Arc<WorkerPool>> {
        self.pools.get(&id).cloned()
    }

    pub fn all_pool_ids(&self) -> Vec<PoolId> {
        self.pools.keys().copied().collect()
    }

    pub fn all_pools(&self) -> impl Iterator<Item = &Arc<WorkerPool>> {
        self.pools.values()
    }

    pub fn pool_by_addr(&self, addr: &NodeAddr) -> Option<Arc<WorkerPool>> {
        self.pools.values().find(|p| &p.addr == addr).cloned()
    }
}

/// Accumulates reconciled `{addr -> pool}` assignments and slot ranges while
/// the monitor parses a `CLUSTER SLOTS` reply, then freezes into a `Snapshot`.
pub struct SnapshotBuilder {
    version: u64,
    slot_map: Box<[Option<PoolId>; NUM_SLOTS]>,
    pools: HashMap<PoolId, Arc<WorkerPool>>,
}

impl SnapshotBuilder {
    pub fn assign_range(&mut self, slot_lo: u16, slot_hi: u16, pool: Arc<WorkerPool>) {
        let id = pool.id;
        self.pools.entry(id).or_insert(pool);
        for slot in slot_lo..=slot_hi {
            self.slot_map[slot as usize] = Some(id);
        }
    }

    pub fn build(self) -> Snapshot {
        Snapshot {
            version: self.version,
            slot_map: self.slot_map,
            pools: self.pools,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn dummy_pool(host: &str, port: u16) -> Arc<WorkerPool> {
        WorkerPool::new(NodeAddr::new(host, port), None, 1, 0, Duration::from_secs(1))
    }

    #[test]
    fn empty_snapshot_routes_nowhere() {
        let snap = Snapshot::empty();
        assert_eq!(snap.version, 0);
        assert!(snap.pool_for_slot(0).is_none());
        assert!(snap.all_pool_ids().is_empty());
    }

    #[test]
    fn builder_assigns_ranges() {
        let pool = dummy_pool("127.0.0.1", 7000);
        let mut builder = Snapshot::builder(1);
        builder.assign_range(0, 100, pool.clone());
        let snap = builder.build();
        assert_eq!(snap.pool_for_slot(0).unwrap().id, pool.id);
        assert_eq!(snap.pool_for_slot(100).unwrap().id, pool.id);
        assert!(snap.pool_for_slot(101).is_none());
        assert_eq!(snap.all_pool_ids(), vec![pool.id]);
    }

    #[test]
    fn lookup_by_addr() {
        let pool = dummy_pool("10.0.0.1", 7000);
        let mut builder = Snapshot::builder(1);
        builder.assign_range(0, 16383, pool.clone());
        let snap = builder.build();
        assert!(snap.pool_by_addr(&NodeAddr::new("10.0.0.1", 7000)).is_some());
        assert!(snap.pool_by_addr(&NodeAddr::new("10.0.0.1", 9999)).is_none());
    }
}
