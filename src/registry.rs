//! Process-wide registry of named clusters: the entry point
//! every public operation resolves a `ClusterHandle` through, keyed by
//! cluster name inside a `DashMap` the same way cluster node tables are kept
//! elsewhere in this codebase.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use crate::command::{Command, Request};
use crate::config::ClusterClientConfig;
use crate::dispatcher;
use crate::error::ClientError;
use crate::helpers::{self, CasWrite};
use crate::monitor::Monitor;
use crate::multi;
use crate::protocol::RespFrame;

/// One connected cluster: its monitor (owning the snapshot and the pools)
/// plus the config it was built from.
pub struct ClusterHandle {
    pub monitor: Arc<Monitor>,
}

/// The process-wide table of named clusters. `ClusterRegistry::default()` is
/// typically wrapped once in an `Arc` (or held as a `static`, e.g. behind
/// `std::sync::OnceLock`) by application bootstrap, which this crate does
/// not itself own.
#[derive(Default)]
pub struct ClusterRegistry {
    clusters: DashMap<String, Arc<ClusterHandle>>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a new cluster under `name`, replacing (and draining) any
    /// prior handle registered under the same name.
    pub async fn connect(&self, name: impl Into<String>, config: ClusterClientConfig) -> Result<(), ClientError> {
        config.validate()?;
        let monitor = Monitor::connect(config).await;
        self.clusters
            .insert(name.into(), Arc::new(ClusterHandle { monitor }));
        Ok(())
    }

    /// Removes the handle for `name`. Pools are dropped (and their idle
    /// workers closed) once the last `Arc` reference — held by any requests
    /// still in flight — is released.
    pub fn disconnect(&self, name: &str) {
        self.clusters.remove(name);
    }

    fn handle(&self, name: &str) -> Result<Arc<ClusterHandle>, ClientError> {
        self.clusters
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| ClientError::UnknownCluster(name.to_string()))
    }

    /// `q(cluster, command)`.
    pub async fn q(&self, name: &str, req: impl Into<Request>) -> Result<RespFrame, ClientError> {
        let handle = self.handle(name)?;
        dispatcher::q(&handle.monitor, &req.into()).await
    }

    /// `qk(cluster, command, routing_key)`.
    pub async fn qk(
        &self,
        name: &str,
        req: impl Into<Request>,
        routing_key: &Bytes,
    ) -> Result<RespFrame, ClientError> {
        let handle = self.handle(name)?;
        dispatcher::qk(&handle.monitor, &req.into(), routing_key).await
    }

    /// `qmn(cluster, pipeline)`: pipeline possibly spanning multiple slots.
    pub async fn qmn(&self, name: &str, commands: Vec<Command>) -> Result<Vec<RespFrame>, ClientError> {
        let handle = self.handle(name)?;
        multi::qmn(&handle.monitor, commands).await
    }

    /// `qa(cluster, command)`: fan-out to every primary.
    pub async fn qa(&self, name: &str, command: Command) -> Result<Vec<Result<RespFrame, ClientError>>, ClientError> {
        let handle = self.handle(name)?;
        Ok(helpers::qa(&handle.monitor, command).await)
    }

    pub async fn flushdb(&self, name: &str) -> Result<(), ClientError> {
        let handle = self.handle(name)?;
        helpers::flushdb(&handle.monitor).await
    }

    /// `transaction(cluster, pipeline)`.
    pub async fn transaction(&self, name: &str, pipeline: Vec<Command>) -> Result<RespFrame, ClientError> {
        let handle = self.handle(name)?;
        dispatcher::transaction(&handle.monitor, pipeline).await
    }

    pub async fn eval_sha(
        &self,
        name: &str,
        sha: &str,
        numkeys: u32,
        keys: &[Bytes],
        args: &[Bytes],
        script_body: &str,
    ) -> Result<RespFrame, ClientError> {
        let handle = self.handle(name)?;
        helpers::eval_sha(&handle.monitor, sha, numkeys, keys, args, script_body).await
    }

    pub async fn optimistic_locking_transaction<T, F, Fut>(
        &self,
        name: &str,
        key: &Bytes,
        compute: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut(RespFrame) -> Fut,
        Fut: std::future::Future<Output = CasWrite<T>>,
    {
        let handle = self.handle(name)?;
        helpers::optimistic_locking_transaction(&handle.monitor, key, compute).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_cluster_is_an_error() {
        let registry = ClusterRegistry::new();
        let result = registry.q("nope", crate::command::cmd(&["GET", "k"])).await;
        assert!(matches!(result, Err(ClientError::UnknownCluster(_))));
    }

    #[tokio::test]
    async fn disconnect_removes_the_handle() {
        let registry = ClusterRegistry::new();
        let config = ClusterClientConfig::new(vec![crate::config::NodeAddr::new("127.0.0.1", 1)]);
        registry.connect("test", config).await.unwrap();
        assert!(registry.handle("test").is_ok());
        registry.disconnect("test");
        assert!(registry.handle("test").is_err());
    }
}
