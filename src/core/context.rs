//! Per-request context threaded through the middleware chain.
//!
//! Holds the request facts decorators need (method, path, headers, client
//! address), the extracted path parameters, and a shared data map for
//! values produced along the chain (request id, JWT claims). The request
//! itself sits in a take-once slot consumed by the proxy handler. The
//! abort flag marks that a middleware has already committed the response.
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::body::Body;
use http::{HeaderMap, Method, Uri};
use hyper::Request;

pub struct RequestContext {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    client_addr: Option<SocketAddr>,
    params: HashMap<String, String>,
    data: Mutex<HashMap<String, serde_json::Value>>,
    request: Mutex<Option<Request<Body>>>,
    aborted: AtomicBool,
}

impl RequestContext {
    pub fn new(
        request: Request<Body>,
        client_addr: Option<SocketAddr>,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            client_addr,
            params,
            data: Mutex::new(HashMap::new()),
            request: Mutex::new(Some(request)),
            aborted: AtomicBool::new(false),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a request header, when it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    pub fn client_ip(&self) -> Option<String> {
        self.client_addr.map(|addr| addr.ip().to_string())
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Store a value for later decorators or the final handler.
    pub fn set(&self, key: &str, value: serde_json::Value) {
        self.data.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.lock().unwrap().get(key).cloned()
    }

    /// Consume the request; the proxy handler is the single taker.
    pub fn take_request(&self) -> Option<Request<Body>> {
        self.request.lock().unwrap().take()
    }

    /// Mark the response as committed by a middleware.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/v1/users?tenant=acme")
            .header("x-request-id", "abc")
            .body(Body::empty())
            .unwrap();
        RequestContext::new(req, Some("1.2.3.4:5678".parse().unwrap()), HashMap::new())
    }

    #[test]
    fn exposes_request_facts() {
        let ctx = ctx();
        assert_eq!(ctx.method(), Method::GET);
        assert_eq!(ctx.path(), "/api/v1/users");
        assert_eq!(ctx.header("X-Request-Id"), Some("abc"));
        assert_eq!(ctx.client_ip().as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn data_map_round_trips() {
        let ctx = ctx();
        ctx.set("request_id", serde_json::json!("r-1"));
        assert_eq!(ctx.get("request_id"), Some(serde_json::json!("r-1")));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn request_slot_is_take_once() {
        let ctx = ctx();
        assert!(ctx.take_request().is_some());
        assert!(ctx.take_request().is_none());
    }

    #[test]
    fn abort_flag() {
        let ctx = ctx();
        assert!(!ctx.is_aborted());
        ctx.abort();
        assert!(ctx.is_aborted());
    }
}
