//! Port for the authoritative configuration store.
//!
//! The gateway only relies on hierarchical key/value semantics: bounded
//! prefix reads for the startup load and streaming watches for steady
//! state. Values under the two well-known prefixes are JSON-encoded
//! routes and upstreams keyed by entity id.
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

pub const ROUTE_PREFIX: &str = "/gateway/routes/";
pub const UPSTREAM_PREFIX: &str = "/gateway/upstreams/";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation failed: {0}")]
    Operation(String),

    #[error("watch stream closed")]
    WatchClosed,
}

/// One change observed under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl StoreEvent {
    pub fn key(&self) -> &str {
        match self {
            StoreEvent::Put { key, .. } | StoreEvent::Delete { key } => key,
        }
    }
}

pub type EventStream = BoxStream<'static, Result<StoreEvent, StoreError>>;

#[async_trait]
pub trait ConfigStore: Send + Sync + 'static {
    /// All key/value pairs currently stored under the prefix.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Stream of subsequent changes under the prefix. Each call opens an
    /// independent subscription starting at the current store revision.
    async fn watch_prefix(&self, prefix: &str) -> Result<EventStream, StoreError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Entity id from a store key, e.g. `/gateway/routes/r1` becomes `r1`.
pub fn strip_id<'a>(key: &'a str, prefix: &str) -> &'a str {
    key.strip_prefix(prefix).unwrap_or(key)
}
