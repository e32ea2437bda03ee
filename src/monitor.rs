//! The per-cluster topology monitor: the only writer of the
//! snapshot. Builds, publishes, and rebuilds it on demand by speaking
//! `CLUSTER SLOTS` directly over a raw worker connection — never through the
//! dispatcher, which would create a cyclic "routing a command that itself
//! needs routing" dependency.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::{ClusterClientConfig, NodeAddr};
use crate::error::ClientError;
use crate::pool::{PoolId, WorkerPool};
use crate::protocol::RespFrame;
use crate::snapshot::Snapshot;
use crate::worker::Worker;

/// `(pool_id, version)` pair returned by a slot lookup, letting the caller
/// carry the snapshot's version forward into the retry/refresh protocol.
#[derive(Debug, Clone, Copy)]
pub struct Routed {
    pub pool_id: PoolId,
    pub version: u64,
}

/// Per-cluster singleton owning the mutable snapshot cell and the config it
/// was built from. One `Monitor` is created per `connect(name, config)` call
/// and lives in the registry's `ClusterHandle`.
pub struct Monitor {
    config: ClusterClientConfig,
    current: RwLock<Arc<Snapshot>>,
    published_version: AtomicU64,
    refresh_gate: Mutex<()>,
    refreshed: Notify,
}

impl Monitor {
    /// Creates the cluster state and attempts an initial slot-map fetch from
    /// the configured init nodes. If none respond the monitor is still
    /// constructed with an empty (`version == 0`, no pools) snapshot;
    /// requests retry-until-TTL and trigger their own refresh.
    pub async fn connect(config: ClusterClientConfig) -> Arc<Self> {
        let monitor = Arc::new(Self {
            config,
            current: RwLock::new(Arc::new(Snapshot::empty())),
            published_version: AtomicU64::new(0),
            refresh_gate: Mutex::new(()),
            refreshed: Notify::new(),
        });
        if let Err(e) = monitor.refresh(0).await {
            warn!(error = %e, "initial CLUSTER SLOTS fetch failed; starting with an empty snapshot");
        }
        monitor
    }

    pub fn config(&self) -> &ClusterClientConfig {
        &self.config
    }

    /// Lock-free fast path read of the current snapshot.
    pub fn get_state(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    /// Convenience read: `None` iff the snapshot has no pool assigned to this
    /// slot, which happens both on cold start (`version == 0`) and for a
    /// slot gap. Callers must treat this arm as "refresh and retry", never
    /// silently skip it.
    pub fn get_pool_by_slot(&self, slot: u16) -> Option<Routed> {
        let snapshot = self.get_state();
        let pool_id = snapshot.pool_id_for_slot(slot)?;
        Some(Routed {
            pool_id,
            version: snapshot.version,
        })
    }

    pub fn get_all_pools(&self) -> Vec<PoolId> {
        self.get_state().all_pool_ids()
    }

    /// Waits until a refresh newer than `observed_version` has published, or
    /// until woken spuriously (callers re-check `get_state` themselves).
    /// Used by the dispatcher while the local snapshot is `undefined`.
    pub async fn wait_for_refresh(&self, observed_version: u64) {
        if self.published_version.load(Ordering::Acquire) > observed_version {
            return;
        }
        self.refreshed.notified().await;
    }

    /// Requests a new snapshot. A no-op if another refresh has already
    /// advanced past `observed_version`. Refreshes for one cluster are
    /// serialized by `refresh_gate`, so a thundering herd hitting MOVED at
    /// once pays for exactly one `CLUSTER SLOTS` round trip.
    pub async fn refresh(&self, observed_version: u64) -> Result<(), ClientError> {
        let _gate = self.refresh_gate.lock().await;
        if self.published_version.load(Ordering::Acquire) > observed_version {
            debug!(observed_version, "refresh superseded by a concurrent rebuild");
            return Ok(());
        }

        let candidates = self.candidate_addrs();
        let mut last_err = None;
        for addr in &candidates {
            match self.fetch_slots_from(addr).await {
                Ok(reply) => {
                    let snapshot = self.build_snapshot(reply);
                    let new_version = snapshot.version;
                    *self.current.write() = Arc::new(snapshot);
                    self.published_version.store(new_version, Ordering::Release);
                    self.refreshed.notify_waiters();
                    info!(cluster_version = new_version, via = %addr, "published new cluster snapshot");
                    return Ok(());
                }
                Err(e) => {
                    warn!(candidate = %addr, error = %e, "CLUSTER SLOTS candidate failed");
                    last_err = Some(e);
                }
            }
        }
        warn!(candidates = candidates.len(), "exhausted all candidates for slot-map refresh");
        Err(last_err.unwrap_or(ClientError::NoConnection))
    }

    /// Candidate order: addresses of pools in the current snapshot (address
    /// order), then the configured init nodes, so a healthy cluster refreshes
    /// against a node it already knows is alive before falling back.
    fn candidate_addrs(&self) -> Vec<NodeAddr> {
        let snapshot = self.get_state();
        let mut addrs: Vec<NodeAddr> = snapshot.all_pools().map(|p| p.addr.clone()).collect();
        addrs.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
        for node in &self.config.nodes {
            if !addrs.contains(node) {
                addrs.push(node.clone());
            }
        }
        addrs
    }

    async fn fetch_slots_from(&self, addr: &NodeAddr) -> Result<RespFrame, ClientError> {
        let mut worker = tokio::time::timeout(
            self.config.connect_timeout(),
            Worker::connect(&addr.host, addr.port, self.config.password.as_deref()),
        )
        .await
        .map_err(|_| ClientError::NoConnection)??;

        let command = vec![Bytes::from_static(b"CLUSTER"), Bytes::from_static(b"SLOTS")];
        let reply = worker.query(&command).await?;
        if let Some(err) = reply.as_error() {
            return Err(ClientError::Server(err.to_string()));
        }
        Ok(reply)
    }

    /// Reconciles a `CLUSTER SLOTS` reply against the previous snapshot:
    /// unchanged addresses keep their `PoolId` (and live connections),
    /// new addresses get a fresh pool, and addresses no longer present are
    /// simply not carried into the new snapshot (dropping the last `Arc`
    /// reference drains their workers once in-flight requests finish).
    fn build_snapshot(&self, reply: RespFrame) -> Snapshot {
        let previous = self.get_state();
        let mut builder = Snapshot::builder(previous.version + 1);

        let RespFrame::Array(ranges) = reply else {
            warn!("CLUSTER SLOTS reply was not an array; publishing an empty snapshot");
            return builder.build();
        };

        for range in ranges {
            let RespFrame::Array(fields) = range else {
                continue;
            };
            let Some((slot_lo, slot_hi, primary)) = parse_slot_range(&fields) else {
                continue;
            };
            let pool = previous
                .pool_by_addr(&primary)
                .unwrap_or_else(|| {
                    debug!(addr = %primary, "discovered new primary");
                    WorkerPool::new(
                        primary.clone(),
                        self.config.password.clone(),
                        self.config.size,
                        self.config.max_overflow,
                        self.config.connect_timeout(),
                    )
                });
            builder.assign_range(slot_lo, slot_hi, pool);
        }

        builder.build()
    }
}

/// Parses one `CLUSTER SLOTS` element: `[slot_lo, slot_hi, [host, port, ...], ...replicas]`.
/// Replica entries are skipped — this client only ever routes to the primary.
fn parse_slot_range(fields: &[RespFrame]) -> Option<(u16, u16, NodeAddr)> {
    let slot_lo = as_integer(fields.first()?)?;
    let slot_hi = as_integer(fields.get(1)?)?;
    let primary_fields = match fields.get(2)? {
        RespFrame::Array(f) => f,
        _ => return None,
    };
    let host = as_bulk_string(primary_fields.first()?)?;
    let port = as_integer(primary_fields.get(1)?)?;
    Some((slot_lo as u16, slot_hi as u16, NodeAddr::new(host, port as u16)))
}

fn as_integer(frame: &RespFrame) -> Option<i64> {
    match frame {
        RespFrame::Integer(i) => Some(*i),
        _ => None,
    }
}

fn as_bulk_string(frame: &RespFrame) -> Option<String> {
    match frame {
        RespFrame::BulkString(b) => String::from_utf8(b.to_vec()).ok(),
        _ => None,
    }
}
