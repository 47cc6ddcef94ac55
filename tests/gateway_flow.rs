// End-to-end flows over the in-memory store: store to watcher to
// snapshots to dispatcher, without real sockets.
#[cfg(test)]
mod test {
    use std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use axum::body::Body;
    use http::StatusCode;
    use hyper::{Request, Response};
    use tokio_util::sync::CancellationToken;

    use synapse::{
        adapters::{ConfigWatcher, HealthChecker, HttpHandler, MemoryStore},
        core::{
            Route, RouteTable, Upstream, UpstreamRegistry,
            middleware::{self, Chain},
            route::{PathType, RoutePredicates, RouteStatus},
            upstream::{HealthState, LoadBalanceKind, Target, TargetStatus},
        },
        ports::{
            config_store::ConfigStore,
            http_client::{HttpClient, ProxyError},
        },
    };

    /// Answers every forwarded request with the authority it was sent to.
    struct ForwardingClient {
        seen: Mutex<Vec<String>>,
    }

    impl ForwardingClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }

        fn authorities(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for ForwardingClient {
        async fn send_request(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
            let authority = req
                .uri()
                .authority()
                .map(|a| a.to_string())
                .unwrap_or_default();
            self.seen.lock().unwrap().push(authority.clone());
            Ok(Response::builder()
                .status(StatusCode::OK)
                .body(Body::from(format!("from {authority}")))
                .unwrap())
        }

        async fn probe(&self, _url: &str, _timeout_secs: u64) -> Result<bool, ProxyError> {
            Ok(true)
        }
    }

    struct Gateway {
        store: Arc<MemoryStore>,
        table: Arc<RouteTable>,
        registry: Arc<UpstreamRegistry>,
        handler: HttpHandler,
        client: Arc<ForwardingClient>,
        watcher: Arc<ConfigWatcher>,
    }

    async fn gateway() -> Gateway {
        let store = Arc::new(MemoryStore::new());
        let table = Arc::new(RouteTable::new());
        let registry = Arc::new(UpstreamRegistry::new());
        let client = ForwardingClient::new();
        let health = Arc::new(HealthChecker::new(
            Arc::clone(&client) as Arc<dyn HttpClient>,
            CancellationToken::new(),
        ));
        let watcher = Arc::new(ConfigWatcher::new(
            Arc::clone(&store) as Arc<dyn ConfigStore>,
            Arc::clone(&table),
            Arc::clone(&registry),
            health,
            CancellationToken::new(),
        ));
        watcher.start().await.unwrap();

        let handler = HttpHandler::new(
            Arc::clone(&table),
            Arc::clone(&registry),
            Arc::clone(&client) as Arc<dyn HttpClient>,
            Chain::new(vec![middleware::recovery(), middleware::request_id()]),
        );

        Gateway {
            store,
            table,
            registry,
            handler,
            client,
            watcher,
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

    fn upstream(id: &str, kind: LoadBalanceKind, addrs: &[(&str, TargetStatus)]) -> Upstream {
        Upstream {
            id: id.to_string(),
            kind,
            targets: addrs
                .iter()
                .map(|(addr, status)| Target {
                    address: (*addr).to_string(),
                    weight: 1,
                    status: HealthState::new(*status),
                    metadata: None,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    async fn put_route(store: &MemoryStore, route: &Route) {
        store
            .put(
                &format!("/gateway/routes/{}", route.id),
                serde_json::to_vec(route).unwrap(),
            )
            .await
            .unwrap();
    }

    async fn put_upstream(store: &MemoryStore, upstream: &Upstream) {
        store
            .put(
                &format!("/gateway/upstreams/{}", upstream.id),
                serde_json::to_vec(upstream).unwrap(),
            )
            .await
            .unwrap();
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    const CLIENT: &str = "1.2.3.4:5678";

    fn client_addr() -> Option<SocketAddr> {
        Some(CLIENT.parse().unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn prefix_match_round_robins_between_targets() {
        let gw = gateway().await;
        put_route(&gw.store, &route("r1", 10, "/api/v1", "u1")).await;
        put_upstream(
            &gw.store,
            &upstream(
                "u1",
                LoadBalanceKind::RoundRobin,
                &[
                    ("10.0.0.1:80", TargetStatus::Healthy),
                    ("10.0.0.2:80", TargetStatus::Healthy),
                ],
            ),
        )
        .await;
        settle().await;

        let first = gw.handler.handle(get("/api/v1/users"), client_addr()).await;
        let second = gw.handler.handle(get("/api/v1/users"), client_addr()).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);

        let seen = gw.client.authorities();
        assert_eq!(seen, vec!["10.0.0.2:80", "10.0.0.1:80"]);

        // Unmatched paths are a route miss.
        let miss = gw.handler.handle(get("/other"), client_addr()).await;
        assert_eq!(miss.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_healthy_target_yields_503() {
        let gw = gateway().await;
        put_route(&gw.store, &route("r1", 10, "/api", "u1")).await;
        put_upstream(
            &gw.store,
            &upstream(
                "u1",
                LoadBalanceKind::RoundRobin,
                &[("10.0.0.1:80", TargetStatus::Unhealthy)],
            ),
        )
        .await;
        settle().await;

        let response = gw.handler.handle(get("/api"), client_addr()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(gw.client.authorities().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn route_to_missing_upstream_yields_503() {
        let gw = gateway().await;
        put_route(&gw.store, &route("r1", 10, "/api", "ghost")).await;
        settle().await;

        let response = gw.handler.handle(get("/api"), client_addr()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ip_hash_keeps_clients_sticky() {
        let gw = gateway().await;
        put_route(&gw.store, &route("r1", 10, "/api", "u1")).await;
        put_upstream(
            &gw.store,
            &upstream(
                "u1",
                LoadBalanceKind::IpHash,
                &[
                    ("10.0.0.1:80", TargetStatus::Healthy),
                    ("10.0.0.2:80", TargetStatus::Healthy),
                ],
            ),
        )
        .await;
        settle().await;

        for _ in 0..5 {
            gw.handler.handle(get("/api"), client_addr()).await;
        }
        let seen = gw.client.authorities();
        assert!(seen.windows(2).all(|w| w[0] == w[1]));

        // A different client lands on the CRC32-determined slot.
        let other: SocketAddr = "5.6.7.8:1111".parse().unwrap();
        gw.handler.handle(get("/api"), Some(other)).await;
        let expected = crc32fast::hash(b"5.6.7.8") as usize % 2;
        let expected_addr = ["10.0.0.1:80", "10.0.0.2:80"][expected];
        assert_eq!(gw.client.authorities().last().unwrap(), expected_addr);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn live_reconfig_moves_traffic_immediately() {
        let gw = gateway().await;
        put_route(&gw.store, &route("old", 10, "/api", "u1")).await;
        put_upstream(
            &gw.store,
            &upstream(
                "u1",
                LoadBalanceKind::RoundRobin,
                &[("10.0.0.1:80", TargetStatus::Healthy)],
            ),
        )
        .await;
        settle().await;

        gw.handler.handle(get("/api"), client_addr()).await;
        assert_eq!(gw.client.authorities().last().unwrap(), "10.0.0.1:80");

        // A higher-priority route shows up and takes the traffic.
        put_upstream(
            &gw.store,
            &upstream(
                "u2",
                LoadBalanceKind::RoundRobin,
                &[("10.9.9.9:80", TargetStatus::Healthy)],
            ),
        )
        .await;
        put_route(&gw.store, &route("new", 20, "/api", "u2")).await;
        settle().await;

        gw.handler.handle(get("/api"), client_addr()).await;
        assert_eq!(gw.client.authorities().last().unwrap(), "10.9.9.9:80");

        // Deleting it reverts to the old route at once.
        gw.store.delete("/gateway/routes/new").await.unwrap();
        settle().await;

        gw.handler.handle(get("/api"), client_addr()).await;
        assert_eq!(gw.client.authorities().last().unwrap(), "10.0.0.1:80");

        gw.watcher.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn host_and_header_predicates_gate_matching() {
        let gw = gateway().await;
        let mut gated = route("r1", 10, "/api", "u1");
        gated.predicates.hosts = vec!["api.example.com".to_string()];
        gated.predicates.headers =
            HashMap::from([("X-API-Key".to_string(), "secret".to_string())]);
        put_route(&gw.store, &gated).await;
        put_upstream(
            &gw.store,
            &upstream(
                "u1",
                LoadBalanceKind::RoundRobin,
                &[("10.0.0.1:80", TargetStatus::Healthy)],
            ),
        )
        .await;
        settle().await;

        let plain = gw.handler.handle(get("/api"), client_addr()).await;
        assert_eq!(plain.status(), StatusCode::NOT_FOUND);

        let full = Request::builder()
            .uri("/api")
            .header("host", "api.example.com")
            .header("x-api-key", "secret")
            .body(Body::empty())
            .unwrap();
        let matched = gw.handler.handle(full, client_addr()).await;
        assert_eq!(matched.status(), StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn republished_upstream_keeps_conn_counters() {
        let gw = gateway().await;
        put_route(&gw.store, &route("r1", 10, "/api", "u1")).await;
        put_upstream(
            &gw.store,
            &upstream(
                "u1",
                LoadBalanceKind::LeastConn,
                &[("10.0.0.1:80", TargetStatus::Healthy)],
            ),
        )
        .await;
        settle().await;

        let entry = gw.registry.get("u1").unwrap();
        entry.upstream.targets[0].incr_conns();

        // Touch the upstream config without changing the target.
        let mut touched = upstream(
            "u1",
            LoadBalanceKind::LeastConn,
            &[("10.0.0.1:80", TargetStatus::Healthy)],
        );
        touched.version = 2;
        put_upstream(&gw.store, &touched).await;
        settle().await;

        let replaced = gw.registry.get("u1").unwrap();
        assert_eq!(replaced.upstream.targets[0].active_conns(), 1);
        assert_eq!(replaced.upstream.version, 2);

        assert_eq!(gw.table.len(), 1);
    }
}
