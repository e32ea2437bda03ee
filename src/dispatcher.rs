//! The public dispatcher: routes a command to the right pool, interprets
//! the reply, and drives the retry/refresh state machine on routing and
//! transport signals.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, instrument};

use crate::command::{Command, Request};
use crate::error::{ClientError, RoutingSignal};
use crate::key;
use crate::monitor::Monitor;
use crate::protocol::RespFrame;
use crate::slot::slot_of;
use crate::worker::Worker;

/// Classifies one attempt's outcome into the retry/refresh decision table.
#[derive(Debug)]
enum Outcome {
    /// Return this result (success or error) to the caller verbatim; nothing
    /// more to do.
    Terminal(Result<RespFrame, ClientError>),
    /// A routing/transport signal: refresh (if `refresh` holds a version to
    /// invalidate) then retry.
    Retry { refresh: Option<u64> },
}

/// §4.F.1's table: only `no_connection` and a closed socket are retryable.
/// Every other error — a domain error, an auth failure, a config error, a
/// genuine I/O error — is the table's first row ("any error not listed
/// below") and must reach the caller unchanged rather than being retried
/// into a misleading `NoConnection`.
fn classify(result: &Result<RespFrame, ClientError>, observed_version: u64) -> Outcome {
    match result {
        Ok(RespFrame::Error(msg)) => match RoutingSignal::from_server_error(msg) {
            Some(signal) if signal.requires_refresh() => Outcome::Retry {
                refresh: Some(observed_version),
            },
            _ => Outcome::Terminal(Ok(RespFrame::Error(msg.clone()))),
        },
        Ok(RespFrame::Array(items)) if pipeline_needs_retry(items) => Outcome::Retry {
            refresh: Some(observed_version),
        },
        Ok(frame) => Outcome::Terminal(Ok(frame.clone())),
        Err(ClientError::NoConnection) => Outcome::Retry {
            refresh: Some(observed_version),
        },
        Err(ClientError::Transport(crate::worker::WorkerError::Closed)) => {
            Outcome::Retry { refresh: None }
        }
        Err(e) => Outcome::Terminal(Err(e.clone())),
    }
}

/// A pipeline reply retries as a whole if *any* element signals a routing
/// error.
fn pipeline_needs_retry(items: &[RespFrame]) -> bool {
    items.iter().any(|item| {
        matches!(item, RespFrame::Error(msg) if RoutingSignal::from_server_error(msg)
            .is_some_and(RoutingSignal::requires_refresh))
    })
}

/// Runs the body of a single request attempt: given a snapshot-derived pool
/// and the commands to issue, execute them on a borrowed worker and fold the
/// reply list back into one `RespFrame` (an `Array` for pipelines, the sole
/// element otherwise), matching how the server itself replies to a pipeline.
async fn execute_on_pool(
    pool: &crate::pool::WorkerPool,
    commands: &[Command],
) -> Result<RespFrame, ClientError> {
    if commands.len() == 1 {
        let cmd = commands[0].clone();
        pool.with_worker(|w: &mut Worker| async move { w.query(&cmd).await })
            .await
    } else {
        let cmds = commands.to_vec();
        let replies = pool
            .with_worker(|w: &mut Worker| async move { w.pipeline(&cmds).await })
            .await?;
        Ok(RespFrame::Array(replies))
    }
}

/// Runs the retry/refresh state machine for one request, given a closure
/// that performs one attempt against a resolved pool.
///
/// `REQUEST_TTL` bounds the attempt counter; attempts `>= 1` sleep
/// `RETRY_DELAY` first, except when retrying because the snapshot was
/// `undefined` (no point throttling the very first refresh).
async fn run_with_retries<F, Fut>(
    monitor: &Monitor,
    routing_key: &Bytes,
    mut attempt_once: F,
) -> Result<RespFrame, ClientError>
where
    F: FnMut(std::sync::Arc<crate::pool::WorkerPool>) -> Fut,
    Fut: std::future::Future<Output = Result<RespFrame, ClientError>>,
{
    let slot = slot_of(routing_key);
    let request_ttl = monitor.config().request_ttl;
    let retry_delay = monitor.config().retry_delay_ms;

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        // Resolve pool and version from one snapshot read, so the attempt
        // and the refresh-version check never disagree about which snapshot
        // was in play.
        let snapshot = monitor.get_state();
        let resolved = snapshot
            .pool_id_for_slot(slot)
            .and_then(|id| snapshot.pool(id).map(|pool| (pool, snapshot.version)));
        let snapshot_was_undefined = resolved.is_none();

        match resolved {
            None => {
                debug!(attempt, slot, "snapshot undefined, refreshing before retry");
                let _ = monitor.refresh(0).await;
            }
            Some((pool, version)) => {
                let result = attempt_once(pool).await;
                match classify(&result, version) {
                    Outcome::Terminal(outcome) => return outcome,
                    Outcome::Retry { refresh } => {
                        debug!(attempt, slot, refresh = refresh.is_some(), "retrying after routing signal");
                        if let Some(observed) = refresh {
                            let _ = monitor.refresh(observed).await;
                        }
                    }
                }
            }
        }

        if attempt >= request_ttl {
            return Err(ClientError::NoConnection);
        }
        if !snapshot_was_undefined {
            tokio::time::sleep(Duration::from_millis(retry_delay)).await;
        }
    }
}

/// `q(cluster, command)`: single command or pipeline on one slot, routed by
/// the command's own extracted key.
#[instrument(skip(monitor, req))]
pub async fn q(monitor: &Monitor, req: &Request) -> Result<RespFrame, ClientError> {
    let routing_key = key::key_of(req).ok_or(ClientError::InvalidClusterCommand)?;
    qk(monitor, req, &routing_key).await
}

/// `qk(cluster, command, routing_key)`: force the routing key rather than
/// extracting it from the command.
#[instrument(skip(monitor, req, routing_key))]
pub async fn qk(
    monitor: &Monitor,
    req: &Request,
    routing_key: &Bytes,
) -> Result<RespFrame, ClientError> {
    let commands = req.commands().to_vec();
    run_with_retries(monitor, routing_key, |pool| {
        let commands = commands.clone();
        async move { execute_on_pool(&pool, &commands).await }
    })
    .await
}

/// `transaction(cluster, pipeline)`: wraps the pipeline in `MULTI`...`EXEC`
/// and returns the final `EXEC` reply. Callers are responsible for slot
/// affinity across the pipeline.
pub async fn transaction(monitor: &Monitor, pipeline: Vec<Command>) -> Result<RespFrame, ClientError> {
    let mut wrapped = Vec::with_capacity(pipeline.len() + 2);
    wrapped.push(crate::command::cmd(&["MULTI"]));
    wrapped.extend(pipeline);
    wrapped.push(crate::command::cmd(&["EXEC"]));
    let req: Request = wrapped.into();
    let reply = q(monitor, &req).await?;
    match reply {
        RespFrame::Array(mut items) => Ok(items.pop().unwrap_or(RespFrame::Null)),
        other => Ok(other),
    }
}

/// `transaction(cluster, fn, routing_key)`: runs `f` against a worker
/// borrowed from `routing_key`'s pool, applying the same retry/refresh state
/// machine `qk` uses so a stale slot map doesn't feed a `MOVED`/`CLUSTERDOWN`
/// reply into the caller's closure as if it were real data. `f` reports
/// whichever reply should be checked against §4.F.1's table alongside its
/// own result value (for a WATCH/GET/EXEC sequence, typically the last reply
/// seen); this is a separate, composable retry budget from any CAS-contention
/// retry the caller layers on top (see `optimistic_locking_transaction`).
#[instrument(skip(monitor, routing_key, f))]
pub async fn transaction_fn<T, F, Fut>(
    monitor: &Monitor,
    routing_key: &Bytes,
    mut f: F,
) -> Result<T, ClientError>
where
    F: FnMut(std::sync::Arc<crate::pool::WorkerPool>) -> Fut,
    Fut: std::future::Future<Output = Result<(T, RespFrame), ClientError>>,
{
    let slot = slot_of(routing_key);
    let request_ttl = monitor.config().request_ttl;
    let retry_delay = monitor.config().retry_delay_ms;

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let snapshot = monitor.get_state();
        let resolved = snapshot
            .pool_id_for_slot(slot)
            .and_then(|id| snapshot.pool(id).map(|pool| (pool, snapshot.version)));
        let snapshot_was_undefined = resolved.is_none();

        match resolved {
            None => {
                debug!(attempt, slot, "snapshot undefined, refreshing before retry");
                let _ = monitor.refresh(0).await;
            }
            Some((pool, version)) => {
                let result = f(pool).await;
                let signal: Result<RespFrame, ClientError> = match &result {
                    Ok((_, frame)) => Ok(frame.clone()),
                    Err(e) => Err(e.clone()),
                };
                match classify(&signal, version) {
                    Outcome::Terminal(_) => return result.map(|(value, _)| value),
                    Outcome::Retry { refresh } => {
                        debug!(attempt, slot, refresh = refresh.is_some(), "retrying transaction_fn after routing signal");
                        if let Some(observed) = refresh {
                            let _ = monitor.refresh(observed).await;
                        }
                    }
                }
            }
        }

        if attempt >= request_ttl {
            return Err(ClientError::NoConnection);
        }
        if !snapshot_was_undefined {
            tokio::time::sleep(Duration::from_millis(retry_delay)).await;
        }
    }
}
