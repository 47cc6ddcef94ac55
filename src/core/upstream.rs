//! Upstream pool entities: a set of backend targets plus the policy and
//! health-check settings that govern selection.
//!
//! Persisted fields round-trip through JSON unchanged. Runtime state
//! (health streaks, connection counters, probe timestamps) lives in
//! atomics on the target so the health checker and the request path can
//! mutate it through a shared reference; it is never serialized.
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by upstream validation and decoding.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    #[error("upstream id cannot be empty")]
    EmptyId,

    #[error("upstream must have at least one target")]
    NoTargets,

    #[error("invalid load balance type")]
    InvalidKind,

    #[error("target[{0}] address cannot be empty")]
    EmptyTargetAddress(usize),

    #[error("invalid upstream json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Load-balancing policy tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum LoadBalanceKind {
    #[serde(rename = "round-robin")]
    RoundRobin,
    #[serde(rename = "weighted")]
    Weighted,
    #[serde(rename = "least-conn")]
    LeastConn,
    #[serde(rename = "ip-hash")]
    IpHash,
    #[serde(rename = "random")]
    Random,
    /// Anything unrecognized; rejected by validation.
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl From<String> for LoadBalanceKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "round-robin" => LoadBalanceKind::RoundRobin,
            "weighted" => LoadBalanceKind::Weighted,
            "least-conn" => LoadBalanceKind::LeastConn,
            "ip-hash" => LoadBalanceKind::IpHash,
            "random" => LoadBalanceKind::Random,
            _ => LoadBalanceKind::Unknown,
        }
    }
}

/// Observed health of a target. Selection only ever considers healthy
/// targets; fresh targets start unknown until the checker promotes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum TargetStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl From<String> for TargetStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "healthy" => TargetStatus::Healthy,
            "unhealthy" => TargetStatus::Unhealthy,
            _ => TargetStatus::Unknown,
        }
    }
}

const STATUS_UNKNOWN: u8 = 0;
const STATUS_HEALTHY: u8 = 1;
const STATUS_UNHEALTHY: u8 = 2;

/// Atomically readable/writable health status with the wire shape of
/// [`TargetStatus`].
#[derive(Debug)]
pub struct HealthState(AtomicU8);

impl HealthState {
    pub fn new(status: TargetStatus) -> Self {
        let v = match status {
            TargetStatus::Unknown => STATUS_UNKNOWN,
            TargetStatus::Healthy => STATUS_HEALTHY,
            TargetStatus::Unhealthy => STATUS_UNHEALTHY,
        };
        Self(AtomicU8::new(v))
    }

    pub fn get(&self) -> TargetStatus {
        match self.0.load(Ordering::Acquire) {
            STATUS_HEALTHY => TargetStatus::Healthy,
            STATUS_UNHEALTHY => TargetStatus::Unhealthy,
            _ => TargetStatus::Unknown,
        }
    }

    pub fn set(&self, status: TargetStatus) {
        let v = match status {
            TargetStatus::Unknown => STATUS_UNKNOWN,
            TargetStatus::Healthy => STATUS_HEALTHY,
            TargetStatus::Unhealthy => STATUS_UNHEALTHY,
        };
        self.0.store(v, Ordering::Release);
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new(TargetStatus::Unknown)
    }
}

impl Clone for HealthState {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl PartialEq for HealthState {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl Serialize for HealthState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HealthState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::new(TargetStatus::deserialize(deserializer)?))
    }
}

/// Runtime-only state. Mutated in place through shared references; reset
/// for targets whose address was not present before a re-publish.
#[derive(Debug, Default)]
pub struct TargetRuntime {
    pub fail_count: AtomicU32,
    pub success_count: AtomicU32,
    pub active_conns: AtomicU32,
    /// Epoch seconds of the last probe; 0 means never probed.
    pub last_check_at: AtomicU64,
    pub last_fail_at: AtomicU64,
}

/// One backend endpoint (`host:port`).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Target {
    pub address: String,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub status: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip)]
    pub runtime: TargetRuntime,
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.weight == other.weight
            && self.status == other.status
            && self.metadata == other.metadata
    }
}

impl Target {
    pub fn active_conns(&self) -> u32 {
        self.runtime.active_conns.load(Ordering::Relaxed)
    }

    pub fn incr_conns(&self) {
        self.runtime.active_conns.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturating decrement; the counter never drops below zero.
    pub fn decr_conns(&self) {
        let _ = self
            .runtime
            .active_conns
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Carry health status and counters over from a previous incarnation
    /// of the same address.
    pub fn adopt_runtime(&self, old: &Target) {
        self.status.set(old.status.get());
        self.runtime
            .fail_count
            .store(old.runtime.fail_count.load(Ordering::Relaxed), Ordering::Relaxed);
        self.runtime.success_count.store(
            old.runtime.success_count.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        self.runtime.active_conns.store(
            old.runtime.active_conns.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        self.runtime.last_check_at.store(
            old.runtime.last_check_at.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        self.runtime.last_fail_at.store(
            old.runtime.last_fail_at.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
    }
}

/// Active health-check settings. Zero-valued fields are filled with
/// defaults during upstream validation when checking is enabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub enabled: bool,
    /// Probe type: "http" (default) or "tcp".
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub interval: u64,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub healthy_threshold: u32,
    #[serde(default)]
    pub unhealthy_threshold: u32,
}

/// A named pool of backend targets with a selection policy.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: LoadBalanceKind,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    /// Request timeout in seconds; 0 disables the per-request deadline.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub update_time: i64,
}

impl Upstream {
    /// Validate and normalize in place: weights clamp to at least 1 and
    /// health-check defaults are applied when checking is enabled.
    pub fn validate(&mut self) -> Result<(), UpstreamError> {
        if self.id.is_empty() {
            return Err(UpstreamError::EmptyId);
        }
        if self.targets.is_empty() {
            return Err(UpstreamError::NoTargets);
        }
        if self.kind == LoadBalanceKind::Unknown {
            return Err(UpstreamError::InvalidKind);
        }

        for (i, target) in self.targets.iter_mut().enumerate() {
            if target.address.is_empty() {
                return Err(UpstreamError::EmptyTargetAddress(i));
            }
            if target.weight < 1 {
                target.weight = 1;
            }
        }

        if let Some(hc) = &mut self.health_check {
            if hc.enabled {
                if hc.interval == 0 {
                    hc.interval = 10;
                }
                if hc.timeout == 0 {
                    hc.timeout = 5;
                }
                if hc.healthy_threshold == 0 {
                    hc.healthy_threshold = 2;
                }
                if hc.unhealthy_threshold == 0 {
                    hc.unhealthy_threshold = 3;
                }
            }
        }

        Ok(())
    }

    /// Decode a persisted upstream and validate it.
    pub fn from_json(data: &[u8]) -> Result<Self, UpstreamError> {
        let mut upstream: Upstream = serde_json::from_slice(data)?;
        upstream.validate()?;
        Ok(upstream)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, UpstreamError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Targets currently eligible for selection.
    pub fn healthy_targets(&self) -> Vec<&Target> {
        self.targets
            .iter()
            .filter(|t| t.status.get() == TargetStatus::Healthy)
            .collect()
    }

    pub fn find_target(&self, address: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.address == address)
    }
}
