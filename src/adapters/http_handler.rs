//! Data-plane dispatcher: match, select, wrap, forward.
//!
//! One instance serves every request on the proxy listener. The flow per
//! request: match against the route table, look up the upstream, pick a
//! target through the cached balancer, then run the middleware chain
//! around the proxy handler. The connection-count guard spans the chain
//! invocation so the decrement fires on every exit path, including a
//! chain timeout that drops the proxy future mid-flight.
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::body::Body;
use futures_util::FutureExt;
use http::{HeaderValue, StatusCode, Uri, header};
use hyper::{Request, Response};

use crate::{
    core::{
        RouteTable, UpstreamRegistry,
        context::RequestContext,
        middleware::{self, Chain, Handler, text_response},
        route::MatchRequest,
    },
    metrics,
    ports::http_client::HttpClient,
};

pub struct HttpHandler {
    table: Arc<RouteTable>,
    registry: Arc<UpstreamRegistry>,
    http_client: Arc<dyn HttpClient>,
    chain: Chain,
}

impl HttpHandler {
    pub fn new(
        table: Arc<RouteTable>,
        registry: Arc<UpstreamRegistry>,
        http_client: Arc<dyn HttpClient>,
        chain: Chain,
    ) -> Self {
        Self {
            table,
            registry,
            http_client,
            chain,
        }
    }

    pub async fn handle(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        let start = Instant::now();
        let response = self.dispatch(req, client_addr).await;
        metrics::record_request(response.status().as_u16(), start.elapsed());
        response
    }

    async fn dispatch(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        let query = parse_query(req.uri().query());
        let host = request_host(&req);
        let matched = self.table.match_request(&MatchRequest {
            path: req.uri().path(),
            method: req.method().as_str(),
            host: &host,
            headers: req.headers(),
            query: &query,
        });
        let Some((route, params)) = matched else {
            return text_response(StatusCode::NOT_FOUND, "404 Not Found");
        };

        let Some(entry) = self.registry.get(&route.upstream_id) else {
            tracing::warn!(route_id = %route.id, upstream_id = %route.upstream_id, "upstream not found");
            return text_response(StatusCode::SERVICE_UNAVAILABLE, "503 Upstream Not Found");
        };

        let client_ip = client_addr.map(|a| a.ip().to_string()).unwrap_or_default();
        let address = match entry.balancer.select(&client_ip) {
            Ok(target) => target.address.clone(),
            Err(err) => {
                metrics::record_selection_failure(&route.upstream_id);
                tracing::warn!(upstream_id = %route.upstream_id, error = %err, "selection failed");
                return text_response(StatusCode::SERVICE_UNAVAILABLE, "503 No Healthy Target");
            }
        };

        let ctx = Arc::new(RequestContext::new(req, client_addr, params));
        let _conns = ConnGuard::acquire(
            Arc::clone(&self.registry),
            route.upstream_id.clone(),
            address.clone(),
        );

        let chain = if entry.upstream.timeout > 0 {
            self.chain.append(vec![middleware::timeout(Duration::from_secs(
                entry.upstream.timeout,
            ))])
        } else {
            self.chain.clone()
        };

        let handler = chain.then(proxy_handler(Arc::clone(&self.http_client), address));
        handler(ctx).await
    }
}

/// Holds the `active_conns` increment for the duration of a request.
///
/// The decrement resolves the target through the registry at drop time,
/// so it lands on the current incarnation of the upstream even if a
/// re-publish swapped the entry mid-request.
struct ConnGuard {
    registry: Arc<UpstreamRegistry>,
    upstream_id: String,
    address: String,
}

impl ConnGuard {
    fn acquire(registry: Arc<UpstreamRegistry>, upstream_id: String, address: String) -> Self {
        if let Some(entry) = registry.get(&upstream_id) {
            if let Some(target) = entry.upstream.find_target(&address) {
                target.incr_conns();
            }
        }
        Self {
            registry,
            upstream_id,
            address,
        }
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if let Some(entry) = self.registry.get(&self.upstream_id) {
            if let Some(target) = entry.upstream.find_target(&self.address) {
                target.decr_conns();
            }
        }
    }
}

/// The innermost handler: rewrite the outbound request for the selected
/// target and forward it. Transport failures surface as 502.
fn proxy_handler(client: Arc<dyn HttpClient>, address: String) -> Handler {
    Arc::new(move |ctx: Arc<RequestContext>| {
        let client = Arc::clone(&client);
        let address = address.clone();
        async move {
            let Some(mut req) = ctx.take_request() else {
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            };

            let path_and_query = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/")
                .to_string();
            let uri = Uri::builder()
                .scheme("http")
                .authority(address.as_str())
                .path_and_query(path_and_query)
                .build();
            match uri {
                Ok(uri) => *req.uri_mut() = uri,
                Err(err) => {
                    tracing::error!(target = %address, error = %err, "invalid target address");
                    return text_response(StatusCode::BAD_GATEWAY, "502 Bad Gateway");
                }
            }

            if let Ok(host) = HeaderValue::from_str(&address) {
                req.headers_mut().insert(header::HOST, host);
            }
            if let Some(ip) = ctx.client_ip() {
                let forwarded = match req
                    .headers()
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                {
                    Some(prior) => format!("{prior}, {ip}"),
                    None => ip,
                };
                if let Ok(value) = HeaderValue::from_str(&forwarded) {
                    req.headers_mut().insert("x-forwarded-for", value);
                }
            }
            req.headers_mut()
                .insert("x-forwarded-proto", HeaderValue::from_static("http"));

            match client.send_request(req).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!(target = %address, error = %err, "proxy error");
                    text_response(StatusCode::BAD_GATEWAY, "502 Bad Gateway")
                }
            }
        }
        .boxed()
    })
}

/// Query string as a map; the first value wins for repeated keys, values
/// compare byte-for-byte as sent.
fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(query) = query else {
        return map;
    };
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        map.entry(key.to_string()).or_insert_with(|| value.to_string());
    }
    map
}

fn request_host(req: &Request<Body>) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().host().map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        core::{
            Route, Upstream,
            route::{PathType, RoutePredicates, RouteStatus},
            upstream::{HealthCheck, HealthState, LoadBalanceKind, Target, TargetStatus},
        },
        ports::http_client::ProxyError,
    };

    /// Records forwarded requests and answers 200, or fails on demand.
    struct RecordingClient {
        fail: bool,
        seen: Mutex<Vec<(Uri, http::HeaderMap)>>,
    }

    impl RecordingClient {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_request(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
            self.seen
                .lock()
                .unwrap()
                .push((req.uri().clone(), req.headers().clone()));
            if self.fail {
                return Err(ProxyError::Connection("refused".to_string()));
            }
            Ok(Response::builder()
                .status(StatusCode::OK)
                .body(Body::from("upstream ok"))
                .unwrap())
        }

        async fn probe(&self, _url: &str, _timeout_secs: u64) -> Result<bool, ProxyError> {
            Ok(true)
        }
    }

    fn route(id: &str, priority: i32, path: &str, upstream_id: &str) -> Route {
        Route {
            id: id.to_string(),
            name: String::new(),
            priority,
            status: RouteStatus::Enabled,
            predicates: RoutePredicates {
                path: path.to_string(),
                path_type: PathType::Prefix,
                ..Default::default()
            },
            upstream_id: upstream_id.to_string(),
            version: 1,
            create_time: 0,
            update_time: 0,
        }
    }

    fn upstream(id: &str, kind: LoadBalanceKind, addrs: &[&str]) -> Upstream {
        Upstream {
            id: id.to_string(),
            kind,
            targets: addrs
                .iter()
                .map(|a| Target {
                    address: (*a).to_string(),
                    weight: 1,
                    status: HealthState::new(TargetStatus::Healthy),
                    ..Default::default()
                })
                .collect(),
            health_check: Some(HealthCheck::default()),
            ..Default::default()
        }
    }

    fn handler_with(client: Arc<RecordingClient>) -> (HttpHandler, Arc<UpstreamRegistry>) {
        let table = Arc::new(RouteTable::new());
        let registry = Arc::new(UpstreamRegistry::new());
        table.upsert(route("r1", 10, "/api", "u1")).unwrap();
        registry
            .put(upstream("u1", LoadBalanceKind::RoundRobin, &["10.0.0.1:80", "10.0.0.2:80"]))
            .unwrap();

        let handler = HttpHandler::new(
            table,
            Arc::clone(&registry),
            client,
            Chain::new(vec![middleware::recovery()]),
        );
        (handler, registry)
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    const CLIENT: &str = "1.2.3.4:9999";

    #[tokio::test]
    async fn unmatched_requests_get_404() {
        let (handler, _) = handler_with(RecordingClient::new(false));
        let response = handler.handle(get("/other"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_upstream_gets_503() {
        let client = RecordingClient::new(false);
        let table = Arc::new(RouteTable::new());
        table.upsert(route("r1", 1, "/api", "ghost")).unwrap();
        let handler = HttpHandler::new(
            table,
            Arc::new(UpstreamRegistry::new()),
            client,
            Chain::default(),
        );

        let response = handler.handle(get("/api"), None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn no_healthy_target_gets_503() {
        let client = RecordingClient::new(false);
        let (handler, registry) = handler_with(client);
        for target in &registry.get("u1").unwrap().upstream.targets {
            target.status.set(TargetStatus::Unhealthy);
        }

        let response = handler.handle(get("/api"), None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn round_robin_alternates_across_requests() {
        let client = RecordingClient::new(false);
        let (handler, _) = handler_with(Arc::clone(&client));

        handler.handle(get("/api/v1/users"), Some(CLIENT.parse().unwrap())).await;
        handler.handle(get("/api/v1/users"), Some(CLIENT.parse().unwrap())).await;

        let seen = client.seen.lock().unwrap();
        let hosts: Vec<_> = seen.iter().map(|(uri, _)| uri.authority().unwrap().as_str()).collect();
        assert_eq!(hosts, vec!["10.0.0.2:80", "10.0.0.1:80"]);
    }

    #[tokio::test]
    async fn outbound_request_is_rewritten() {
        let client = RecordingClient::new(false);
        let (handler, _) = handler_with(Arc::clone(&client));

        let req = Request::builder()
            .uri("/api/v1/users?x=1")
            .header("x-forwarded-for", "9.9.9.9")
            .body(Body::empty())
            .unwrap();
        let response = handler.handle(req, Some(CLIENT.parse().unwrap())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let seen = client.seen.lock().unwrap();
        let (uri, headers) = &seen[0];
        assert_eq!(uri.scheme_str(), Some("http"));
        assert_eq!(uri.path_and_query().unwrap().as_str(), "/api/v1/users?x=1");
        assert_eq!(headers["host"], uri.authority().unwrap().as_str());
        assert_eq!(headers["x-forwarded-for"], "9.9.9.9, 1.2.3.4");
        assert_eq!(headers["x-forwarded-proto"], "http");
    }

    #[tokio::test]
    async fn transport_errors_surface_as_502() {
        let client = RecordingClient::new(true);
        let (handler, _) = handler_with(client);

        let response = handler.handle(get("/api"), Some(CLIENT.parse().unwrap())).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn conn_counters_return_to_zero() {
        let client = RecordingClient::new(false);
        let (handler, registry) = handler_with(client);

        for _ in 0..4 {
            handler.handle(get("/api"), Some(CLIENT.parse().unwrap())).await;
        }

        let entry = registry.get("u1").unwrap();
        for target in &entry.upstream.targets {
            assert_eq!(target.active_conns(), 0);
        }
    }
}
