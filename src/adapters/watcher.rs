//! Configuration watcher: mirrors the store into the in-memory snapshots.
//!
//! Startup performs a bounded full load of both prefixes; store I/O
//! errors there are fatal while individual undecodable entities are
//! skipped with a log line. Steady state runs one watch loop per prefix,
//! applying events in arrival order. A broken watch stream sleeps five
//! seconds and re-subscribes from the current revision; the request path
//! keeps serving the last good snapshots throughout.
use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    adapters::health_checker::HealthChecker,
    core::{Route, RouteTable, Upstream, UpstreamRegistry},
    ports::config_store::{
        ConfigStore, ROUTE_PREFIX, StoreError, StoreEvent, UPSTREAM_PREFIX, strip_id,
    },
};

const INITIAL_LOAD_DEADLINE: Duration = Duration::from_secs(10);
const REWATCH_BACKOFF: Duration = Duration::from_secs(5);

pub struct ConfigWatcher {
    store: Arc<dyn ConfigStore>,
    table: Arc<RouteTable>,
    registry: Arc<UpstreamRegistry>,
    health: Arc<HealthChecker>,
    cancel: CancellationToken,
}

impl ConfigWatcher {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        table: Arc<RouteTable>,
        registry: Arc<UpstreamRegistry>,
        health: Arc<HealthChecker>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            table,
            registry,
            health,
            cancel,
        }
    }

    /// Load the initial snapshots, then spawn both watch loops.
    /// Only a store failure during the initial load is fatal.
    pub async fn start(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>, StoreError> {
        self.load_all().await?;

        let handles = vec![self.spawn_watch(ROUTE_PREFIX), self.spawn_watch(UPSTREAM_PREFIX)];
        tracing::info!("config watcher started");
        Ok(handles)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn load_all(&self) -> Result<(), StoreError> {
        let fetch = async {
            let routes = self.store.get_prefix(ROUTE_PREFIX).await?;
            let upstreams = self.store.get_prefix(UPSTREAM_PREFIX).await?;
            Ok::<_, StoreError>((routes, upstreams))
        };
        let (route_kvs, upstream_kvs) = tokio::time::timeout(INITIAL_LOAD_DEADLINE, fetch)
            .await
            .map_err(|_| StoreError::Operation("initial config load timed out".to_string()))??;

        let routes: Vec<Route> = route_kvs
            .iter()
            .filter_map(|(key, value)| match Route::from_json(value) {
                Ok(route) => Some(route),
                Err(err) => {
                    tracing::error!(key = %key, error = %err, "failed to parse route");
                    None
                }
            })
            .collect();
        self.table.load(routes);

        let upstreams: Vec<Upstream> = upstream_kvs
            .iter()
            .filter_map(|(key, value)| match Upstream::from_json(value) {
                Ok(upstream) => Some(upstream),
                Err(err) => {
                    tracing::error!(key = %key, error = %err, "failed to parse upstream");
                    None
                }
            })
            .collect();
        for upstream in self.registry.load(upstreams) {
            self.health.upsert_upstream(upstream);
        }

        tracing::info!(
            routes = self.table.len(),
            upstreams = self.registry.len(),
            "loaded initial configs"
        );
        Ok(())
    }

    fn spawn_watch(self: &Arc<Self>, prefix: &'static str) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.watch_loop(prefix).await })
    }

    async fn watch_loop(&self, prefix: &'static str) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let mut stream = match self.store.watch_prefix(prefix).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::error!(prefix, error = %err, "failed to establish watch");
                    if !self.backoff().await {
                        return;
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    item = stream.next() => match item {
                        Some(Ok(event)) => self.apply_event(prefix, event),
                        Some(Err(err)) => {
                            tracing::error!(prefix, error = %err, "watch stream error");
                            break;
                        }
                        None => {
                            tracing::warn!(prefix, "watch stream ended");
                            break;
                        }
                    }
                }
            }

            if !self.backoff().await {
                return;
            }
        }
    }

    /// Sleep before re-subscribing; false means shutdown won the race.
    async fn backoff(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(REWATCH_BACKOFF) => true,
        }
    }

    fn apply_event(&self, prefix: &str, event: StoreEvent) {
        match prefix {
            ROUTE_PREFIX => self.apply_route_event(event),
            UPSTREAM_PREFIX => self.apply_upstream_event(event),
            _ => {}
        }
    }

    fn apply_route_event(&self, event: StoreEvent) {
        match event {
            StoreEvent::Put { key, value } => match Route::from_json(&value) {
                Ok(route) => {
                    let id = route.id.clone();
                    match self.table.upsert(route) {
                        Ok(()) => tracing::info!(route_id = %id, "route updated"),
                        Err(err) => {
                            tracing::error!(route_id = %id, error = %err, "failed to update route");
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(key = %key, error = %err, "failed to parse route from event");
                }
            },
            StoreEvent::Delete { key } => {
                let id = strip_id(&key, ROUTE_PREFIX);
                self.table.delete(id);
                tracing::info!(route_id = %id, "route deleted");
            }
        }
    }

    fn apply_upstream_event(&self, event: StoreEvent) {
        match event {
            StoreEvent::Put { key, value } => match Upstream::from_json(&value) {
                Ok(upstream) => match self.registry.put(upstream) {
                    Ok(installed) => {
                        let id = installed.id.clone();
                        self.health.upsert_upstream(installed);
                        tracing::info!(upstream_id = %id, "upstream updated");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to update upstream");
                    }
                },
                Err(err) => {
                    tracing::error!(key = %key, error = %err, "failed to parse upstream from event");
                }
            },
            StoreEvent::Delete { key } => {
                let id = strip_id(&key, UPSTREAM_PREFIX);
                self.registry.delete(id);
                self.health.remove_upstream(id);
                tracing::info!(upstream_id = %id, "upstream deleted");
            }
        }
    }
}
