//! Admin REST surface: CRUD over routes and upstreams.
//!
//! Writes go through the config store; the watcher observes them and
//! installs the result, so the admin plane never touches the live
//! snapshots directly. Reads are served from the snapshots, which
//! reflect what the data plane is actually using.
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;

use crate::{
    core::{Route, RouteTable, Upstream, UpstreamRegistry},
    ports::config_store::{ConfigStore, ROUTE_PREFIX, UPSTREAM_PREFIX},
};

pub struct AdminState {
    pub store: Arc<dyn ConfigStore>,
    pub table: Arc<RouteTable>,
    pub registry: Arc<UpstreamRegistry>,
}

pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/admin/routes", get(list_routes).post(create_route))
        .route(
            "/admin/routes/{id}",
            get(get_route).put(update_route).delete(delete_route),
        )
        .route("/admin/upstreams", get(list_upstreams).post(create_upstream))
        .route(
            "/admin/upstreams/{id}",
            get(get_upstream).put(update_upstream).delete(delete_upstream),
        )
        .route("/admin/health", get(health))
        .with_state(state)
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn validation_failed(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::BAD_REQUEST,
        format!("Validation failed: {err}"),
    )
        .into_response()
}

fn store_failed(action: &str, err: impl std::fmt::Display) -> Response {
    tracing::error!(error = %err, "admin store operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Failed to {action}"),
    )
        .into_response()
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "healthy"}))
}

async fn list_routes(State(state): State<Arc<AdminState>>) -> Response {
    let routes = state.table.list();
    Json(json!({"total": routes.len(), "data": routes})).into_response()
}

async fn get_route(State(state): State<Arc<AdminState>>, Path(id): Path<String>) -> Response {
    match state.table.get(&id) {
        Some(route) => Json(route).into_response(),
        None => (StatusCode::NOT_FOUND, "Route not found").into_response(),
    }
}

async fn create_route(
    State(state): State<Arc<AdminState>>,
    Json(mut route): Json<Route>,
) -> Response {
    let now = now_secs();
    route.create_time = now;
    route.update_time = now;
    route.version = 1;

    if let Err(err) = route.validate() {
        return validation_failed(err);
    }

    let Ok(data) = route.to_json() else {
        return store_failed("save route", "encode error");
    };
    let key = format!("{ROUTE_PREFIX}{}", route.id);
    match state.store.put(&key, data).await {
        Ok(()) => (StatusCode::CREATED, Json(route)).into_response(),
        Err(err) => store_failed("save route", err),
    }
}

async fn update_route(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    Json(mut route): Json<Route>,
) -> Response {
    route.id = id;
    route.update_time = now_secs();

    if let Err(err) = route.validate() {
        return validation_failed(err);
    }

    let Ok(data) = route.to_json() else {
        return store_failed("update route", "encode error");
    };
    let key = format!("{ROUTE_PREFIX}{}", route.id);
    match state.store.put(&key, data).await {
        Ok(()) => Json(route).into_response(),
        Err(err) => store_failed("update route", err),
    }
}

async fn delete_route(State(state): State<Arc<AdminState>>, Path(id): Path<String>) -> Response {
    let key = format!("{ROUTE_PREFIX}{id}");
    match state.store.delete(&key).await {
        Ok(()) => Json(json!({"message": "Route deleted successfully"})).into_response(),
        Err(err) => store_failed("delete route", err),
    }
}

async fn list_upstreams(State(state): State<Arc<AdminState>>) -> Response {
    let upstreams = state.registry.list();
    Json(json!({"total": upstreams.len(), "data": upstreams})).into_response()
}

async fn get_upstream(State(state): State<Arc<AdminState>>, Path(id): Path<String>) -> Response {
    match state.registry.get(&id) {
        Some(entry) => Json(&entry.upstream).into_response(),
        None => (StatusCode::NOT_FOUND, "Upstream not found").into_response(),
    }
}

async fn create_upstream(
    State(state): State<Arc<AdminState>>,
    Json(mut upstream): Json<Upstream>,
) -> Response {
    let now = now_secs();
    upstream.create_time = now;
    upstream.update_time = now;
    upstream.version = 1;

    if let Err(err) = upstream.validate() {
        return validation_failed(err);
    }

    let Ok(data) = upstream.to_json() else {
        return store_failed("save upstream", "encode error");
    };
    let key = format!("{UPSTREAM_PREFIX}{}", upstream.id);
    match state.store.put(&key, data).await {
        Ok(()) => (StatusCode::CREATED, Json(upstream)).into_response(),
        Err(err) => store_failed("save upstream", err),
    }
}

async fn update_upstream(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    Json(mut upstream): Json<Upstream>,
) -> Response {
    upstream.id = id;
    upstream.update_time = now_secs();

    if let Err(err) = upstream.validate() {
        return validation_failed(err);
    }

    let Ok(data) = upstream.to_json() else {
        return store_failed("update upstream", "encode error");
    };
    let key = format!("{UPSTREAM_PREFIX}{}", upstream.id);
    match state.store.put(&key, data).await {
        Ok(()) => Json(upstream).into_response(),
        Err(err) => store_failed("update upstream", err),
    }
}

async fn delete_upstream(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
) -> Response {
    let key = format!("{UPSTREAM_PREFIX}{id}");
    match state.store.delete(&key).await {
        Ok(()) => Json(json!({"message": "Upstream deleted successfully"})).into_response(),
        Err(err) => store_failed("delete upstream", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::memory_store::MemoryStore,
        core::{
            route::{PathType, RoutePredicates, RouteStatus},
            upstream::{HealthState, LoadBalanceKind, Target, TargetStatus},
        },
    };

    fn state() -> Arc<AdminState> {
        Arc::new(AdminState {
            store: Arc::new(MemoryStore::new()),
            table: Arc::new(RouteTable::new()),
            registry: Arc::new(UpstreamRegistry::new()),
        })
    }

    fn sample_route(id: &str) -> Route {
        Route {
            id: id.to_string(),
            name: String::new(),
            priority: 1,
            status: RouteStatus::Enabled,
            predicates: RoutePredicates {
                path: "/api".to_string(),
                path_type: PathType::Prefix,
                ..Default::default()
            },
            upstream_id: "u1".to_string(),
            version: 0,
            create_time: 0,
            update_time: 0,
        }
    }

    fn sample_upstream(id: &str) -> Upstream {
        Upstream {
            id: id.to_string(),
            kind: LoadBalanceKind::RoundRobin,
            targets: vec![Target {
                address: "10.0.0.1:80".to_string(),
                weight: 1,
                status: HealthState::new(TargetStatus::Healthy),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_route_persists_to_the_store() {
        let state = state();
        let response = create_route(State(Arc::clone(&state)), Json(sample_route("r1"))).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let kvs = state.store.get_prefix(ROUTE_PREFIX).await.unwrap();
        assert_eq!(kvs.len(), 1);
        assert_eq!(kvs[0].0, "/gateway/routes/r1");

        let stored = Route::from_json(&kvs[0].1).unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.create_time > 0);
        assert_eq!(stored.create_time, stored.update_time);
    }

    #[tokio::test]
    async fn create_route_rejects_invalid_input() {
        let state = state();
        let mut bad = sample_route("r1");
        bad.upstream_id = String::new();
        let response = create_route(State(Arc::clone(&state)), Json(bad)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.get_prefix(ROUTE_PREFIX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_route_takes_id_from_the_url() {
        let state = state();
        let mut body = sample_route("ignored");
        body.priority = 7;
        let response = update_route(
            State(Arc::clone(&state)),
            Path("r9".to_string()),
            Json(body),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let kvs = state.store.get_prefix(ROUTE_PREFIX).await.unwrap();
        assert_eq!(kvs[0].0, "/gateway/routes/r9");
        let stored = Route::from_json(&kvs[0].1).unwrap();
        assert_eq!(stored.id, "r9");
        assert!(stored.update_time > 0);
    }

    #[tokio::test]
    async fn route_reads_come_from_the_live_table() {
        let state = state();
        state.table.upsert(sample_route("r1")).unwrap();

        let found = get_route(State(Arc::clone(&state)), Path("r1".to_string())).await;
        assert_eq!(found.status(), StatusCode::OK);

        let missing = get_route(State(Arc::clone(&state)), Path("nope".to_string())).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let listing = list_routes(State(state)).await;
        assert_eq!(listing.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn delete_route_removes_the_store_key() {
        let state = state();
        create_route(State(Arc::clone(&state)), Json(sample_route("r1"))).await;

        let response = delete_route(State(Arc::clone(&state)), Path("r1".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.store.get_prefix(ROUTE_PREFIX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upstream_crud_round_trips() {
        let state = state();
        let created =
            create_upstream(State(Arc::clone(&state)), Json(sample_upstream("u1"))).await;
        assert_eq!(created.status(), StatusCode::CREATED);

        let kvs = state.store.get_prefix(UPSTREAM_PREFIX).await.unwrap();
        assert_eq!(kvs[0].0, "/gateway/upstreams/u1");

        let mut bad = sample_upstream("u2");
        bad.targets.clear();
        let rejected = create_upstream(State(Arc::clone(&state)), Json(bad)).await;
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let deleted = delete_upstream(State(Arc::clone(&state)), Path("u1".to_string())).await;
        assert_eq!(deleted.status(), StatusCode::OK);
        assert!(state
            .store
            .get_prefix(UPSTREAM_PREFIX)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn upstream_reads_come_from_the_registry() {
        let state = state();
        state.registry.put(sample_upstream("u1")).unwrap();

        let found = get_upstream(State(Arc::clone(&state)), Path("u1".to_string())).await;
        assert_eq!(found.status(), StatusCode::OK);

        let missing = get_upstream(State(state), Path("ghost".to_string())).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
