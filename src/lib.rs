//! A routing client for a sharded, hash-slotted in-memory key-value cluster.
//!
//! Application code issues logical commands against a symbolic cluster name
//! without knowing which primary owns which hash slot; [`ClusterRegistry`]
//! discovers and caches the slot→node mapping, routes each command to the
//! right primary's [`pool::WorkerPool`], and transparently refreshes the
//! mapping and retries on `MOVED`/`CLUSTERDOWN`/`TRYAGAIN`/`READONLY` and
//! transport failures within a bounded budget (`REQUEST_TTL`).
//!
//! See `DESIGN.md` in the repository root for the design rationale behind
//! each module.

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod helpers;
pub mod key;
pub mod monitor;
pub mod multi;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod slot;
pub mod snapshot;
pub mod worker;

pub use command::{Command, Request, cmd};
pub use config::{ClusterClientConfig, NodeAddr};
pub use error::ClientError;
pub use protocol::RespFrame;
pub use registry::ClusterRegistry;
