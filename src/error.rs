//! The primary error type surfaced by the cluster client.

use std::sync::Arc;
use thiserror::Error;

/// Errors returned to callers of the dispatcher and its helpers.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("no cluster named '{0}' has been connected")]
    UnknownCluster(String),

    #[error("command has no extractable routing key and is not a fan-out command")]
    InvalidClusterCommand,

    #[error("no_connection: exhausted retry budget without a successful reply")]
    NoConnection,

    #[error("resource_busy: optimistic-locking transaction exceeded its CAS retry budget")]
    ResourceBusy,

    #[error("server error: {0}")]
    Server(String),

    #[error("transport error: {0}")]
    Transport(#[from] crate::worker::WorkerError),

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Clone for ClientError {
    fn clone(&self) -> Self {
        match self {
            Self::UnknownCluster(s) => Self::UnknownCluster(s.clone()),
            Self::InvalidClusterCommand => Self::InvalidClusterCommand,
            Self::NoConnection => Self::NoConnection,
            Self::ResourceBusy => Self::ResourceBusy,
            Self::Server(s) => Self::Server(s.clone()),
            Self::Transport(e) => Self::Transport(e.clone()),
            Self::Io(e) => Self::Io(Arc::clone(e)),
            Self::Config(s) => Self::Config(s.clone()),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

/// The four server error classes that the dispatcher treats as "refresh and
/// retry" signals. Transport-level failures (connection closed, no
/// connection available) are classified separately, straight off
/// `ClientError`, since they never arrive as a server reply string. Anything
/// else (including `ASK`, which this client does not follow) is either
/// terminal success or a domain error returned verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingSignal {
    Moved,
    ClusterDown,
    TryAgain,
    Readonly,
}

impl RoutingSignal {
    /// Classifies a server error's leading token. Returns `None` when the
    /// error is a plain domain error (or `ASK`, unsupported) that should
    /// never be retried.
    pub fn from_server_error(message: &str) -> Option<Self> {
        let token = message.split_whitespace().next().unwrap_or("");
        match token {
            "MOVED" => Some(Self::Moved),
            "CLUSTERDOWN" => Some(Self::ClusterDown),
            "TRYAGAIN" => Some(Self::TryAgain),
            "READONLY" => Some(Self::Readonly),
            _ => None,
        }
    }

    /// Every server-error signal recognized here triggers a slot-map
    /// refresh before retrying; kept as a method (rather than inlining
    /// `is_some()` at call sites) so the decision has one name.
    pub fn requires_refresh(self) -> bool {
        true
    }
}
