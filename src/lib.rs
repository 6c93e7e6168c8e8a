//! SkyDNS - distributed service discovery served over DNS.
//!
//! Services announce themselves over a JSON HTTP API and are discovered by
//! arbitrary DNS clients as SRV (and A) records under a six-label naming
//! scheme: `id.host.region.version.name.environment.<zone>`. Every mutation
//! is serialized through a replicated command log, so a cluster of replicas
//! converges on the same registry and survives node failures.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                            skydns                              │
//! │                                                                │
//! │  ┌────────────┐  announce   ┌─────────────┐   apply            │
//! │  │ HTTP API   │────────────▶│ Command bus │──────────┐         │
//! │  │ (axum)     │             │ (log order) │          ▼         │
//! │  └────────────┘             └─────────────┘   ┌────────────┐   │
//! │        │ reads                     ▲          │  Registry  │   │
//! │        └──────────────────────────┐│          │ name tree  │   │
//! │  ┌────────────┐   1s tick         ││          │ id index   │   │
//! │  │ Lease ctrl │───────────────────┘│          │ denial idx │   │
//! │  │ (leader)   │  remove-service    │          └────────────┘   │
//! │  └────────────┘                    │                ▲          │
//! │                                    │                │ lookups  │
//! │  ┌──────────────────┐              │          ┌────────────┐   │
//! │  │ Upstream forward │◀─────────────┼──────────│ DNS engine │◀──┼── UDP/TCP :53
//! │  │ (UDP, TCP)       │   non-local  questions  │ (hickory)  │   │
//! │  └──────────────────┘                         └────────────┘   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Query semantics
//!
//! ```text
//! dig east.any.testservice.production.skydns.local SRV
//!   → lookup key "east.any.testservice.production", left-padded with
//!     wildcards to six labels
//!   → services in region "east" at priority 10, equal weights
//!   → services elsewhere appended at priority 20 (cross-region fallback)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use skydns::{bus::StandaloneBus, DnsServer, Registry};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Registry::new();
//!     let bus = StandaloneBus::open("./data".as_ref(), registry.clone()).unwrap();
//!     let cancel = CancellationToken::new();
//!
//!     let config = skydns::config::DnsConfig { /* ... */ };
//!     DnsServer::new(config, registry).run(cancel).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod authority;
pub mod bus;
pub mod callback;
pub mod command;
pub mod config;
pub mod denial;
#[cfg(feature = "dnssec")]
pub mod dnssec;
pub mod error;
pub mod forward;
pub mod lease;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod service;
pub mod telemetry;
pub mod tree;

// Re-export main types
pub use command::Command;
pub use config::{Config, DnsConfig, HttpConfig, SoaConfig, TelemetryConfig};
pub use error::Error;
pub use registry::Registry;
pub use server::DnsServer;
pub use service::{Callback, Service};
