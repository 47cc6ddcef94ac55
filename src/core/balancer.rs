//! Load-balancing policies.
//!
//! A balancer is bound to one upstream and picks among its currently
//! healthy targets. Policies are cached per upstream by the registry and
//! rebuilt whenever the upstream is re-published, which also resets the
//! weighted cursor. Selection runs in the request hot path; the only
//! policy that locks is the weighted step-through.
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};

use rand::Rng;
use thiserror::Error;

use crate::core::upstream::{LoadBalanceKind, Target, Upstream};

#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SelectError {
    #[error("no healthy target available")]
    NoHealthyTarget,
}

/// Strategy interface shared by all policies.
pub trait Balancer: Send + Sync + 'static {
    /// Pick a target for the given client IP, or fail when the healthy
    /// set is empty.
    fn select(&self, client_ip: &str) -> Result<&Target, SelectError>;
}

/// Build the policy implementation for an upstream. An unrecognized tag
/// cannot pass validation, so the fallback arm only guards the factory.
pub fn new_balancer(kind: LoadBalanceKind, upstream: Arc<Upstream>) -> Box<dyn Balancer> {
    match kind {
        LoadBalanceKind::Weighted => Box::new(WeightedBalancer::new(upstream)),
        LoadBalanceKind::LeastConn => Box::new(LeastConnBalancer::new(upstream)),
        LoadBalanceKind::IpHash => Box::new(IpHashBalancer::new(upstream)),
        LoadBalanceKind::Random => Box::new(RandomBalancer::new(upstream)),
        LoadBalanceKind::RoundRobin | LoadBalanceKind::Unknown => {
            Box::new(RoundRobinBalancer::new(upstream))
        }
    }
}

/// Cycles through the healthy set with an atomic counter.
pub struct RoundRobinBalancer {
    upstream: Arc<Upstream>,
    current: AtomicU32,
}

impl RoundRobinBalancer {
    pub fn new(upstream: Arc<Upstream>) -> Self {
        Self {
            upstream,
            current: AtomicU32::new(0),
        }
    }
}

impl Balancer for RoundRobinBalancer {
    fn select(&self, _client_ip: &str) -> Result<&Target, SelectError> {
        let targets = self.upstream.healthy_targets();
        if targets.is_empty() {
            return Err(SelectError::NoHealthyTarget);
        }
        let n = self.current.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        Ok(targets[n as usize % targets.len()])
    }
}

/// Deterministic step-through by cumulative weights.
///
/// The cursor lives in `[0, total_weight)` and advances by one per call,
/// so a target with weight w is chosen w times per full cycle.
pub struct WeightedBalancer {
    upstream: Arc<Upstream>,
    current: Mutex<i32>,
}

impl WeightedBalancer {
    pub fn new(upstream: Arc<Upstream>) -> Self {
        Self {
            upstream,
            current: Mutex::new(0),
        }
    }
}

impl Balancer for WeightedBalancer {
    fn select(&self, _client_ip: &str) -> Result<&Target, SelectError> {
        let targets = self.upstream.healthy_targets();
        if targets.is_empty() {
            return Err(SelectError::NoHealthyTarget);
        }

        let total: i32 = targets.iter().map(|t| t.weight).sum();
        let mut current = self.current.lock().unwrap();
        *current = (*current + 1) % total;

        let mut sum = 0;
        for &target in &targets {
            sum += target.weight;
            if *current < sum {
                return Ok(target);
            }
        }
        Ok(targets[0])
    }
}

/// Picks the healthy target with the fewest in-flight requests,
/// first-wins on ties. Counter reads are best effort.
pub struct LeastConnBalancer {
    upstream: Arc<Upstream>,
}

impl LeastConnBalancer {
    pub fn new(upstream: Arc<Upstream>) -> Self {
        Self { upstream }
    }
}

impl Balancer for LeastConnBalancer {
    fn select(&self, _client_ip: &str) -> Result<&Target, SelectError> {
        let targets = self.upstream.healthy_targets();
        if targets.is_empty() {
            return Err(SelectError::NoHealthyTarget);
        }

        let mut selected = targets[0];
        let mut min = selected.active_conns();
        for &target in &targets[1..] {
            let conns = target.active_conns();
            if conns < min {
                min = conns;
                selected = target;
            }
        }
        Ok(selected)
    }
}

/// Sticky selection: CRC32-IEEE of the client IP modulo the healthy set.
pub struct IpHashBalancer {
    upstream: Arc<Upstream>,
}

impl IpHashBalancer {
    pub fn new(upstream: Arc<Upstream>) -> Self {
        Self { upstream }
    }
}

impl Balancer for IpHashBalancer {
    fn select(&self, client_ip: &str) -> Result<&Target, SelectError> {
        let targets = self.upstream.healthy_targets();
        if targets.is_empty() {
            return Err(SelectError::NoHealthyTarget);
        }
        let hash = crc32fast::hash(client_ip.as_bytes());
        Ok(targets[hash as usize % targets.len()])
    }
}

/// Uniform selection over the healthy set.
pub struct RandomBalancer {
    upstream: Arc<Upstream>,
}

impl RandomBalancer {
    pub fn new(upstream: Arc<Upstream>) -> Self {
        Self { upstream }
    }
}

impl Balancer for RandomBalancer {
    fn select(&self, _client_ip: &str) -> Result<&Target, SelectError> {
        let targets = self.upstream.healthy_targets();
        if targets.is_empty() {
            return Err(SelectError::NoHealthyTarget);
        }
        let idx = rand::rng().random_range(0..targets.len());
        Ok(targets[idx])
    }
}
