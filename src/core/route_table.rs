//! Priority-ordered route table with atomically swappable snapshots.
//!
//! Readers grab the current snapshot without locking and see a frozen,
//! consistent view. Writers serialize behind a mutex so the
//! copy-mutate-publish sequence never races; a snapshot is immutable once
//! published.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use arc_swap::ArcSwap;

use crate::core::route::{MatchRequest, Route, RouteError};

/// Immutable view of the table: routes sorted by priority descending
/// (stable, so equal priorities keep insertion order) plus an id index.
#[derive(Default)]
pub struct RouteTableSnapshot {
    routes: Vec<Arc<Route>>,
    by_id: HashMap<String, Arc<Route>>,
}

impl RouteTableSnapshot {
    fn build(mut routes: Vec<Arc<Route>>) -> Self {
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        let by_id = routes
            .iter()
            .map(|r| (r.id.clone(), Arc::clone(r)))
            .collect();
        Self { routes, by_id }
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Route>> {
        self.by_id.get(id)
    }
}

pub struct RouteTable {
    current: ArcSwap<RouteTableSnapshot>,
    write_lock: Mutex<()>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteTableSnapshot::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Current snapshot; callers iterate it without blocking writers.
    pub fn snapshot(&self) -> Arc<RouteTableSnapshot> {
        self.current.load_full()
    }

    /// Replace the whole table. Invalid entries are dropped with a log
    /// line; they never reach the published snapshot.
    pub fn load(&self, routes: Vec<Route>) {
        let mut valid = Vec::with_capacity(routes.len());
        for mut route in routes {
            match route.validate() {
                Ok(()) => valid.push(Arc::new(route)),
                Err(err) => {
                    tracing::warn!(route_id = %route.id, error = %err, "dropping invalid route");
                }
            }
        }

        let _guard = self.write_lock.lock().unwrap();
        self.current.store(Arc::new(RouteTableSnapshot::build(valid)));
    }

    /// Insert or replace by id. A replaced route keeps its slot among
    /// equal priorities; a new route appends after them.
    pub fn upsert(&self, mut route: Route) -> Result<(), RouteError> {
        route.validate()?;
        let route = Arc::new(route);

        let _guard = self.write_lock.lock().unwrap();
        let mut routes = self.current.load().routes.clone();
        match routes.iter_mut().find(|r| r.id == route.id) {
            Some(slot) => *slot = route,
            None => routes.push(route),
        }
        self.current.store(Arc::new(RouteTableSnapshot::build(routes)));
        Ok(())
    }

    /// Remove by id. Deleting an unknown id is a no-op.
    pub fn delete(&self, id: &str) {
        let _guard = self.write_lock.lock().unwrap();
        let current = self.current.load();
        if current.by_id.contains_key(id) {
            let routes = current
                .routes
                .iter()
                .filter(|r| r.id != id)
                .cloned()
                .collect();
            self.current.store(Arc::new(RouteTableSnapshot::build(routes)));
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Route>> {
        self.current.load().by_id.get(id).cloned()
    }

    /// Defensive copy of the current route list, highest priority first.
    pub fn list(&self) -> Vec<Arc<Route>> {
        self.current.load().routes.clone()
    }

    pub fn len(&self) -> usize {
        self.current.load().routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().routes.is_empty()
    }

    /// Find the highest-priority enabled route whose predicates all hold
    /// and extract its path parameters.
    pub fn match_request(
        &self,
        req: &MatchRequest<'_>,
    ) -> Option<(Arc<Route>, HashMap<String, String>)> {
        let snapshot = self.current.load();
        for route in &snapshot.routes {
            if route.matches(req) {
                let params = route.path_params(req.path);
                return Some((Arc::clone(route), params));
            }
        }
        None
    }
}
