//! Upstream registry: an atomically swappable id to upstream map.
//!
//! Each entry couples the validated upstream with the load balancer built
//! for its policy, so selection state (the weighted cursor, the
//! round-robin counter) is cached per upstream rather than rebuilt per
//! request. Re-publishing an upstream carries runtime state over for
//! targets whose address survives the edit; everything else starts fresh.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use arc_swap::ArcSwap;

use crate::core::{
    balancer::{Balancer, new_balancer},
    upstream::{Upstream, UpstreamError},
};

/// A published upstream plus its cached balancer.
pub struct UpstreamEntry {
    pub upstream: Arc<Upstream>,
    pub balancer: Box<dyn Balancer>,
}

impl UpstreamEntry {
    fn new(upstream: Arc<Upstream>) -> Self {
        let balancer = new_balancer(upstream.kind, Arc::clone(&upstream));
        Self { upstream, balancer }
    }
}

type RegistryMap = HashMap<String, Arc<UpstreamEntry>>;

pub struct UpstreamRegistry {
    current: ArcSwap<RegistryMap>,
    write_lock: Mutex<()>,
}

impl Default for UpstreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamRegistry {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistryMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Replace the whole registry. Invalid entries are dropped with a log
    /// line. Returns the installed upstreams so the caller can register
    /// them for health checking.
    pub fn load(&self, upstreams: Vec<Upstream>) -> Vec<Arc<Upstream>> {
        let mut map = RegistryMap::new();
        for mut upstream in upstreams {
            match upstream.validate() {
                Ok(()) => {
                    let upstream = Arc::new(upstream);
                    map.insert(
                        upstream.id.clone(),
                        Arc::new(UpstreamEntry::new(Arc::clone(&upstream))),
                    );
                }
                Err(err) => {
                    tracing::warn!(upstream_id = %upstream.id, error = %err, "dropping invalid upstream");
                }
            }
        }

        let installed = map.values().map(|e| Arc::clone(&e.upstream)).collect();
        let _guard = self.write_lock.lock().unwrap();
        self.current.store(Arc::new(map));
        installed
    }

    /// Insert or replace by id. Targets that keep their address across
    /// the re-publish adopt the previous runtime state, so live
    /// connection counts and health streaks survive unrelated edits.
    pub fn put(&self, mut upstream: Upstream) -> Result<Arc<Upstream>, UpstreamError> {
        upstream.validate()?;

        let _guard = self.write_lock.lock().unwrap();
        let mut map = (**self.current.load()).clone();

        if let Some(previous) = map.get(&upstream.id) {
            for target in &upstream.targets {
                if let Some(old) = previous.upstream.find_target(&target.address) {
                    target.adopt_runtime(old);
                }
            }
        }

        let upstream = Arc::new(upstream);
        map.insert(
            upstream.id.clone(),
            Arc::new(UpstreamEntry::new(Arc::clone(&upstream))),
        );
        self.current.store(Arc::new(map));
        Ok(upstream)
    }

    /// Remove by id. Removing an unknown id is a no-op.
    pub fn delete(&self, id: &str) {
        let _guard = self.write_lock.lock().unwrap();
        if self.current.load().contains_key(id) {
            let mut map = (**self.current.load()).clone();
            map.remove(id);
            self.current.store(Arc::new(map));
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<UpstreamEntry>> {
        self.current.load().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Upstream>> {
        self.current
            .load()
            .values()
            .map(|e| Arc::clone(&e.upstream))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }
}
