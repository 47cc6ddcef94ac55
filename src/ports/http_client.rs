//! Port for outbound HTTP: proxy forwarding and health probes.
use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};
use thiserror::Error;

/// Transport-level failures talking to a backend target.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Forward a fully rewritten request to its backend.
    async fn send_request(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError>;

    /// Issue a GET against a health endpoint within the deadline.
    /// Returns whether the response status counts as healthy.
    async fn probe(&self, url: &str, timeout_secs: u64) -> Result<bool, ProxyError>;
}
