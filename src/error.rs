//! Error types for skydns.

use thiserror::Error;

/// Errors produced by the registry, the command bus, and the servers.
#[derive(Debug, Error)]
pub enum Error {
    /// A service with the same id is already registered.
    #[error("service already exists in registry")]
    AlreadyExists,

    /// The requested service is not registered.
    #[error("service does not exist in registry")]
    NotFound,

    /// The mutation was submitted to a replica that is not the leader.
    ///
    /// Carries the leader's HTTP address when known, so the control surface
    /// can redirect the caller there.
    #[error("not the cluster leader")]
    NotLeader {
        /// HTTP address of the current leader, if known.
        leader: Option<String>,
    },

    /// A request was malformed or missing a required field.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The shared secret did not match.
    #[error("unauthorized")]
    Unauthorized,

    /// Replication or network failure while submitting a command.
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error (listeners, journal, key files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything without a more precise kind.
    #[error("internal error: {0}")]
    Internal(String),
}
