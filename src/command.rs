//! Replicated commands.
//!
//! Every mutation of the registry travels through the command log as one of
//! these variants, tagged with a stable name so old log entries stay
//! readable. Apply is deterministic: timestamps are computed by the
//! submitter and carried in the payload, never derived at apply time.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::registry::Registry;
use crate::service::{Callback, Service};

/// A mutation applied in log order on every replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    /// Register a service; `service.expires` is already computed.
    AddService {
        /// The full record to insert.
        service: Service,
    },
    /// Refresh a lease with a submitter-computed expiry.
    UpdateTtl {
        /// Service id.
        id: String,
        /// New lease duration in seconds.
        ttl: u32,
        /// New absolute expiry, unix seconds.
        expires: i64,
    },
    /// Drop a service and fire its callbacks.
    RemoveService {
        /// Service id.
        id: String,
    },
    /// Attach a callback to a service.
    AddCallback {
        /// Service id the callback attaches to.
        id: String,
        /// The callback registration.
        callback: Callback,
    },
}

impl Command {
    /// Stable command name, as serialized into the log.
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddService { .. } => "add-service",
            Command::UpdateTtl { .. } => "update-ttl",
            Command::RemoveService { .. } => "remove-service",
            Command::AddCallback { .. } => "add-callback",
        }
    }

    /// Mutate `registry` according to this command.
    pub fn apply(&self, registry: &Registry) -> Result<(), Error> {
        match self {
            Command::AddService { service } => registry.add(service.clone()),
            Command::UpdateTtl { id, ttl, expires } => registry.update_ttl(id, *ttl, *expires),
            Command::RemoveService { id } => registry.remove_by_id(id),
            Command::AddCallback { id, callback } => registry.add_callback(id, callback.clone()),
        }
    }
}
