//! High-level helpers: fan-out, script eval with `NOSCRIPT`
//! fallback, and WATCH-based optimistic-locking transactions.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::command::{Command, cmd};
use crate::dispatcher;
use crate::error::{ClientError, RoutingSignal};
use crate::monitor::Monitor;
use crate::pool::WorkerPool;
use crate::protocol::RespFrame;
use crate::worker::Worker;

/// `qa`: issues `command` against every pool in the current snapshot and
/// returns the list of per-pool results. Collects all results rather than
/// failing fast, and lets the caller reduce.
pub async fn qa(monitor: &Monitor, command: Command) -> Vec<Result<RespFrame, ClientError>> {
    let snapshot = monitor.get_state();
    let mut results = Vec::new();
    for pool_id in snapshot.all_pool_ids() {
        let Some(pool) = snapshot.pool(pool_id) else {
            continue;
        };
        let command = command.clone();
        let result = pool
            .with_worker(|w: &mut Worker| async move { w.query(&command).await })
            .await;
        results.push(result);
    }
    results
}

/// `flushdb`: `qa(["FLUSHDB"])` collapsed to "any error present".
pub async fn flushdb(monitor: &Monitor) -> Result<(), ClientError> {
    let results = qa(monitor, cmd(&["FLUSHDB"])).await;
    for result in results {
        match result? {
            RespFrame::Error(e) => return Err(ClientError::Server(e)),
            _ => continue,
        }
    }
    Ok(())
}

/// Fixed stand-in routing key used when an `EVALSHA`/`EVAL` call has no keys
/// (`numkeys == 0`).
const NO_KEY_STAND_IN: &[u8] = b"A";

/// `EVAL` fast path: issues `EVALSHA hash numkeys keys... args...` routed by
/// the first key (or the stand-in key when there are none). On `NOSCRIPT`,
/// loads the script body and retries once against the same routing key.
pub async fn eval_sha(
    monitor: &Monitor,
    sha: &str,
    numkeys: u32,
    keys: &[Bytes],
    args: &[Bytes],
    script_body: &str,
) -> Result<RespFrame, ClientError> {
    let routing_key = keys
        .first()
        .cloned()
        .unwrap_or_else(|| Bytes::from_static(NO_KEY_STAND_IN));

    let evalsha = build_evalsha(sha, numkeys, keys, args);
    let req = evalsha.clone().into();
    let reply = dispatcher::qk(monitor, &req, &routing_key).await?;

    match &reply {
        RespFrame::Error(msg) if msg.starts_with("NOSCRIPT") => {
            debug!(sha, "NOSCRIPT, loading script body and retrying");
            let load = cmd(&["SCRIPT", "LOAD", script_body]);
            let pipeline: Vec<Command> = vec![load, evalsha];
            let req = pipeline.into();
            let result = dispatcher::qk(monitor, &req, &routing_key).await?;
            match result {
                RespFrame::Array(mut items) if items.len() == 2 => Ok(items.pop().unwrap()),
                other => Ok(other),
            }
        }
        _ => Ok(reply),
    }
}

fn build_evalsha(sha: &str, numkeys: u32, keys: &[Bytes], args: &[Bytes]) -> Command {
    let mut command = vec![
        Bytes::from_static(b"EVALSHA"),
        Bytes::copy_from_slice(sha.as_bytes()),
        Bytes::copy_from_slice(numkeys.to_string().as_bytes()),
    ];
    command.extend(keys.iter().cloned());
    command.extend(args.iter().cloned());
    command
}

/// Outcome of the caller-supplied CAS closure: the write pipeline to run
/// inside `MULTI`/`EXEC`, plus an arbitrary extra value threaded back to the
/// caller of `optimistic_locking_transaction` on success.
pub struct CasWrite<T> {
    pub write_pipeline: Vec<Command>,
    pub extra: T,
}

/// `optimistic_locking_transaction`: `WATCH key`, a read, the caller's
/// closure computing the write, then `MULTI` + writes + `EXEC` on one
/// borrowed worker. A `null` `EXEC` reply means the watched key changed
/// concurrently; the whole closure (including the read) is retried up to
/// `OL_TRANSACTION_TTL` times before surfacing `ResourceBusy`. Built on
/// `dispatcher::transaction_fn`, so a `MOVED`/`CLUSTERDOWN`/`TRYAGAIN`/
/// `READONLY` reply surfacing anywhere in the WATCH/GET/EXEC sequence
/// refreshes the slot map and retries under §4.F.1's budget, composed with
/// (not instead of) this CAS-contention budget.
pub async fn optimistic_locking_transaction<T, F, Fut>(
    monitor: &Monitor,
    key: &Bytes,
    mut compute: F,
) -> Result<T, ClientError>
where
    F: FnMut(RespFrame) -> Fut,
    Fut: std::future::Future<Output = CasWrite<T>>,
{
    let ttl = monitor.config().ol_transaction_ttl;
    let retry_delay = monitor.config().retry_delay_ms;

    for attempt in 1..=ttl {
        let outcome = dispatcher::transaction_fn(monitor, key, |pool| {
            run_cas_attempt(pool, key, &mut compute)
        })
        .await?;

        match outcome {
            Some(value) => return Ok(value),
            None => {
                debug!(attempt, ttl, "CAS attempt lost the watch, retrying");
                tokio::time::sleep(Duration::from_millis(retry_delay)).await;
            }
        }
    }
    Err(ClientError::ResourceBusy)
}

/// `true` if `frame` is a server error carrying a routing signal that
/// requires a slot-map refresh (MOVED/CLUSTERDOWN/TRYAGAIN/READONLY).
fn is_routing_error(frame: &RespFrame) -> bool {
    matches!(frame, RespFrame::Error(msg) if RoutingSignal::from_server_error(msg)
        .is_some_and(RoutingSignal::requires_refresh))
}

/// Runs one WATCH/GET/compute/MULTI-EXEC attempt on a single borrowed
/// worker, so WATCH (connection-scoped on the server) stays valid through to
/// EXEC with no other caller's commands interleaved on the same socket.
/// Returns `(None, reply)` when `EXEC` replied `null` (the watch was lost,
/// i.e. the key changed between `GET` and `EXEC`), or as soon as any reply
/// in the sequence carries a routing signal — in which case the caller's
/// closure is never invoked, since the "read" would otherwise be a stale
/// `MOVED` error masquerading as the watched value.
async fn run_cas_attempt<T, F, Fut>(
    pool: Arc<WorkerPool>,
    key: &Bytes,
    compute: &mut F,
) -> Result<(Option<T>, RespFrame), ClientError>
where
    F: FnMut(RespFrame) -> Fut,
    Fut: std::future::Future<Output = CasWrite<T>>,
{
    let watch = cmd_bytes(&["WATCH"], key);
    let get = cmd_bytes(&["GET"], key);

    // WATCH is connection-scoped on the server, so the read and the final
    // EXEC must share the exact worker that issued it; everything below runs
    // inside one `with_worker` closure rather than three separate borrows.
    pool.with_worker(|w: &mut Worker| async move {
        let watch_reply = w.query(&watch).await?;
        if is_routing_error(&watch_reply) {
            return Ok((None, watch_reply));
        }
        let current = w.query(&get).await?;
        if is_routing_error(&current) {
            return Ok((None, current));
        }

        let CasWrite { write_pipeline, extra } = compute(current).await;
        let mut wrapped = Vec::with_capacity(write_pipeline.len() + 2);
        wrapped.push(cmd(&["MULTI"]));
        wrapped.extend(write_pipeline);
        wrapped.push(cmd(&["EXEC"]));

        let exec_reply = w.pipeline(&wrapped).await?;
        let last = exec_reply.last().cloned().unwrap_or(RespFrame::Null);
        let value = match &last {
            RespFrame::NullArray | RespFrame::Null => None,
            _ => Some(extra),
        };
        Ok((value, last))
    })
    .await
}

fn cmd_bytes(prefix: &[&str], key: &Bytes) -> Command {
    let mut command: Command = prefix.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect();
    command.push(key.clone());
    command
}
