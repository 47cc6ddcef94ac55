//! Outbound HTTP adapter over hyper's pooled legacy client.
//!
//! The data plane speaks plain HTTP/1.1 to its targets; the same client
//! serves proxy forwarding and health probes.
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use hyper::{Method, Request, Response};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};

use crate::ports::http_client::{HttpClient, ProxyError};

pub struct HttpClientAdapter {
    client: Client<HttpConnector, Body>,
}

impl Default for HttpClientAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClientAdapter {
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| ProxyError::Connection(e.to_string()))?;
        Ok(response.map(Body::new))
    }

    async fn probe(&self, url: &str, timeout_secs: u64) -> Result<bool, ProxyError> {
        let uri: hyper::Uri = url
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProxyError::InvalidRequest(e.to_string()))?;
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

        match tokio::time::timeout(Duration::from_secs(timeout_secs), self.client.request(req))
            .await
        {
            Err(_) => Err(ProxyError::Timeout(timeout_secs)),
            Ok(Err(e)) => Err(ProxyError::Connection(e.to_string())),
            Ok(Ok(response)) => {
                let status = response.status().as_u16();
                Ok((200..400).contains(&status))
            }
        }
    }
}
