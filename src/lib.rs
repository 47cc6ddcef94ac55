//! Synapse - a dynamic API gateway and reverse proxy.
//!
//! Synapse terminates client HTTP traffic, matches each request against a
//! priority-ordered route table, and forwards it to a backend target
//! chosen by the upstream's load-balancing policy. Routes and upstreams
//! live in an external etcd store; a watcher mirrors them into atomically
//! swappable in-memory snapshots, so reconfiguration never blocks the
//! request path. A background checker probes targets and flips their
//! health with hysteresis thresholds.
//!
//! # Architecture
//! The crate follows a hexagonal layout: pure domain logic in `core`
//! (entities, route table, balancers, middleware chain), traits at the
//! I/O seams in `ports` (config store, outbound HTTP), and concrete
//! implementations in `adapters` (etcd, hyper client, health checker,
//! watcher, admin API, dispatcher). The binary crate wires these
//! together and runs the two listeners (data plane and admin plane).
//!
//! # Quick example
//! ```no_run
//! use std::sync::Arc;
//!
//! use synapse::{
//!     adapters::{ConfigWatcher, HealthChecker, HttpClientAdapter, MemoryStore},
//!     core::{RouteTable, UpstreamRegistry},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let table = Arc::new(RouteTable::new());
//! let registry = Arc::new(UpstreamRegistry::new());
//! let health = Arc::new(HealthChecker::new(
//!     Arc::new(HttpClientAdapter::new()),
//!     CancellationToken::new(),
//! ));
//! let watcher = Arc::new(ConfigWatcher::new(
//!     store,
//!     Arc::clone(&table),
//!     Arc::clone(&registry),
//!     health,
//!     CancellationToken::new(),
//! ));
//! watcher.start().await?;
//! # Ok(()) }
//! ```
//!
//! # Error handling
//! Domain errors are small `thiserror` enums; everything recoverable is
//! logged and surfaced as an HTTP status. Only a failure to reach the
//! config store at startup is fatal.
pub mod adapters;
pub mod config;
pub mod core;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

pub use crate::{
    adapters::{ConfigWatcher, EtcdStore, HealthChecker, HttpClientAdapter, HttpHandler},
    core::{Route, RouteTable, Upstream, UpstreamRegistry},
    ports::config_store::ConfigStore,
    ports::http_client::HttpClient,
};
