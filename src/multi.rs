//! The multi-pool dispatcher: splits a pipeline across pools,
//! executes each bucket in parallel, and re-stitches results by original
//! index.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, instrument};

use crate::command::Command;
use crate::error::{ClientError, RoutingSignal};
use crate::key;
use crate::monitor::Monitor;
use crate::pool::{PoolId, WorkerPool};
use crate::protocol::RespFrame;
use crate::slot::slot_of;

/// One bucket: the commands that hash to the same pool, plus their original
/// positions in the input pipeline so results can be re-stitched afterward.
struct Bucket {
    pool: Arc<WorkerPool>,
    indices: Vec<usize>,
    commands: Vec<Command>,
}

/// Groups commands by the pool their routing key resolves to, in a single
/// snapshot read so every bucket is computed against the same version.
fn bucket_commands(
    monitor: &Monitor,
    commands: &[Command],
) -> Result<(Vec<Bucket>, u64), ClientError> {
    let snapshot = monitor.get_state();
    let mut by_pool: HashMap<PoolId, Bucket> = HashMap::new();
    let mut order: Vec<PoolId> = Vec::new();

    for (index, command) in commands.iter().enumerate() {
        let req = crate::command::Request::Single(command.clone());
        let key = key::key_of(&req).ok_or(ClientError::InvalidClusterCommand)?;
        let slot = slot_of(&key);
        let pool_id = snapshot.pool_id_for_slot(slot).ok_or(ClientError::NoConnection)?;
        let pool = snapshot.pool(pool_id).ok_or(ClientError::NoConnection)?;

        by_pool
            .entry(pool_id)
            .or_insert_with(|| {
                order.push(pool_id);
                Bucket {
                    pool,
                    indices: Vec::new(),
                    commands: Vec::new(),
                }
            })
            .indices
            .push(index);
        by_pool.get_mut(&pool_id).unwrap().commands.push(command.clone());
    }

    let buckets = order.into_iter().filter_map(|id| by_pool.remove(&id)).collect();
    Ok((buckets, snapshot.version))
}

async fn run_bucket(bucket: Bucket) -> (Vec<usize>, Result<Vec<RespFrame>, ClientError>) {
    let commands = bucket.commands.clone();
    let result = bucket
        .pool
        .with_worker(|w: &mut crate::worker::Worker| async move { w.pipeline(&commands).await })
        .await;
    (bucket.indices, result)
}

fn bucket_needs_retry(replies: &[RespFrame]) -> bool {
    replies.iter().any(|item| {
        matches!(item, RespFrame::Error(msg) if RoutingSignal::from_server_error(msg)
            .is_some_and(RoutingSignal::requires_refresh))
    })
}

/// What to do with one bucket's transport-level failure. Mirrors
/// `dispatcher::classify`'s table: only `no_connection` and a closed socket
/// are retryable; everything else is a real failure the caller must see.
enum BucketError {
    RetryWithRefresh,
    RetryWithoutRefresh,
    Terminal(ClientError),
}

fn classify_bucket_error(err: ClientError) -> BucketError {
    match err {
        ClientError::NoConnection => BucketError::RetryWithRefresh,
        ClientError::Transport(crate::worker::WorkerError::Closed) => {
            BucketError::RetryWithoutRefresh
        }
        other => BucketError::Terminal(other),
    }
}

/// `qmn`: executes a pipeline whose commands may hash to different slots.
/// Buckets are issued concurrently (one `pipeline` call per pool); if any
/// bucket signals a routing error the whole attempt is abandoned and
/// restarted from bucketing (which re-reads the snapshot, refreshing first
/// if a retry requested it).
#[instrument(skip(monitor, commands))]
pub async fn qmn(monitor: &Monitor, commands: Vec<Command>) -> Result<Vec<RespFrame>, ClientError> {
    let request_ttl = monitor.config().request_ttl;
    let retry_delay = monitor.config().retry_delay_ms;

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let (buckets, version) = bucket_commands(monitor, &commands)?;
        let bucket_count = buckets.len();

        let results = join_all(buckets.into_iter().map(run_bucket)).await;

        let mut needs_refresh = false;
        let mut out: Vec<Option<RespFrame>> = vec![None; commands.len()];
        let mut failed = false;

        for (indices, result) in results {
            match result {
                Ok(replies) if bucket_needs_retry(&replies) => {
                    needs_refresh = true;
                    failed = true;
                }
                Ok(replies) => {
                    for (idx, reply) in indices.into_iter().zip(replies) {
                        out[idx] = Some(reply);
                    }
                }
                Err(e) => match classify_bucket_error(e) {
                    BucketError::RetryWithRefresh => {
                        needs_refresh = true;
                        failed = true;
                    }
                    BucketError::RetryWithoutRefresh => {
                        failed = true;
                    }
                    BucketError::Terminal(e) => return Err(e),
                },
            }
        }

        if !failed {
            return Ok(out.into_iter().map(|r| r.unwrap_or(RespFrame::Null)).collect());
        }

        debug!(attempt, bucket_count, "qmn bucket signaled retry, rebucketing");
        if needs_refresh {
            let _ = monitor.refresh(version).await;
        }

        if attempt >= request_ttl {
            return Err(ClientError::NoConnection);
        }
        tokio::time::sleep(Duration::from_millis(retry_delay)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_needs_retry_on_moved() {
        let replies = vec![RespFrame::Error("MOVED 1 host:1".into())];
        assert!(bucket_needs_retry(&replies));
    }

    #[test]
    fn bucket_does_not_retry_on_domain_error() {
        let replies = vec![RespFrame::Error("WRONGTYPE bad".into())];
        assert!(!bucket_needs_retry(&replies));
    }

    #[test]
    fn no_connection_retries_with_refresh() {
        assert!(matches!(
            classify_bucket_error(ClientError::NoConnection),
            BucketError::RetryWithRefresh
        ));
    }

    #[test]
    fn closed_socket_retries_without_refresh() {
        assert!(matches!(
            classify_bucket_error(ClientError::Transport(crate::worker::WorkerError::Closed)),
            BucketError::RetryWithoutRefresh
        ));
    }

    #[test]
    fn auth_failure_is_terminal_not_retried() {
        let err = ClientError::Transport(crate::worker::WorkerError::AuthFailed("WRONGPASS".into()));
        assert!(matches!(classify_bucket_error(err), BucketError::Terminal(_)));
    }
}
