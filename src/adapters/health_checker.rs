//! Background health checker.
//!
//! A single loop ticks every few seconds, snapshots the registered
//! upstreams, and probes the targets of every upstream whose health
//! check is enabled. Upstreams are probed concurrently and independently
//! of each other; targets within an upstream are probed in order. A
//! per-target guard keeps the effective probe rate at the upstream's
//! configured interval even though the sweep tick is faster.
//!
//! Transitions are hysteresis-guarded: a target flips to unhealthy after
//! `unhealthy_threshold` consecutive failures and back to healthy after
//! `healthy_threshold` consecutive successes, each flip logged exactly
//! once. Status lives on the target itself, so balancers observe a
//! transition on their next selection.
use std::{
    sync::{Arc, atomic::Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    core::upstream::{HealthCheck, Target, TargetStatus, Upstream},
    metrics,
    ports::http_client::HttpClient,
};

const SWEEP_TICK: Duration = Duration::from_secs(5);

pub struct HealthChecker {
    upstreams: scc::HashMap<String, Arc<Upstream>>,
    http_client: Arc<dyn HttpClient>,
    cancel: CancellationToken,
    tick: Duration,
}

impl HealthChecker {
    pub fn new(http_client: Arc<dyn HttpClient>, cancel: CancellationToken) -> Self {
        Self {
            upstreams: scc::HashMap::new(),
            http_client,
            cancel,
            tick: SWEEP_TICK,
        }
    }

    #[cfg(test)]
    fn with_tick(http_client: Arc<dyn HttpClient>, tick: Duration) -> Self {
        Self {
            upstreams: scc::HashMap::new(),
            http_client,
            cancel: CancellationToken::new(),
            tick,
        }
    }

    /// Register or replace an upstream in the probed set.
    pub fn upsert_upstream(&self, upstream: Arc<Upstream>) {
        let _ = self.upstreams.remove_sync(&upstream.id);
        let _ = self.upstreams.insert_sync(upstream.id.clone(), upstream);
    }

    pub fn remove_upstream(&self, id: &str) {
        let _ = self.upstreams.remove_sync(id);
    }

    /// Spawn the probe loop. It runs until the cancellation token fires.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("health checker started");
            this.run().await;
        })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run(&self) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; consume
        // it so every sweep starts one full tick after startup.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("health checker stopped");
                    return;
                }
                _ = interval.tick() => self.sweep().await,
            }
        }
    }

    /// One pass over the registered set.
    pub async fn sweep(&self) {
        let mut snapshot = Vec::new();
        self.upstreams.iter_sync(|_, upstream| {
            snapshot.push(Arc::clone(upstream));
            true
        });

        let checks = snapshot
            .into_iter()
            .filter(|u| u.health_check.as_ref().is_some_and(|hc| hc.enabled))
            .map(|u| async move { self.check_upstream(&u).await });
        futures_util::future::join_all(checks).await;
    }

    async fn check_upstream(&self, upstream: &Upstream) {
        let Some(hc) = upstream.health_check.as_ref() else {
            return;
        };

        let mut warned_unknown_kind = false;
        for target in &upstream.targets {
            let now = epoch_secs();
            let last = target.runtime.last_check_at.load(Ordering::Relaxed);
            if last != 0 && now.saturating_sub(last) < hc.interval {
                continue;
            }

            let healthy = self
                .probe_target(upstream, hc, target, &mut warned_unknown_kind)
                .await;
            self.apply_outcome(upstream, hc, target, healthy);
        }
    }

    async fn probe_target(
        &self,
        upstream: &Upstream,
        hc: &HealthCheck,
        target: &Target,
        warned_unknown_kind: &mut bool,
    ) -> bool {
        match hc.kind.as_str() {
            "http" | "" => {
                let url = format!("http://{}{}", target.address, hc.path);
                match self.http_client.probe(&url, hc.timeout).await {
                    Ok(healthy) => healthy,
                    Err(err) => {
                        tracing::debug!(
                            upstream = %upstream.id,
                            target = %target.address,
                            error = %err,
                            "health probe failed"
                        );
                        false
                    }
                }
            }
            "tcp" => probe_tcp(&target.address, hc.timeout).await,
            other => {
                if !*warned_unknown_kind {
                    tracing::warn!(
                        upstream = %upstream.id,
                        kind = other,
                        "unsupported health check type"
                    );
                    *warned_unknown_kind = true;
                }
                false
            }
        }
    }

    fn apply_outcome(&self, upstream: &Upstream, hc: &HealthCheck, target: &Target, healthy: bool) {
        let now = epoch_secs();
        target.runtime.last_check_at.store(now, Ordering::Relaxed);

        if healthy {
            target.runtime.fail_count.store(0, Ordering::Relaxed);
            if target.status.get() == TargetStatus::Healthy {
                target.runtime.success_count.store(0, Ordering::Relaxed);
                return;
            }
            let streak = target.runtime.success_count.fetch_add(1, Ordering::Relaxed) + 1;
            if streak >= hc.healthy_threshold {
                target.status.set(TargetStatus::Healthy);
                target.runtime.success_count.store(0, Ordering::Relaxed);
                metrics::set_target_health(&target.address, true);
                tracing::info!(
                    upstream = %upstream.id,
                    target = %target.address,
                    "target became healthy"
                );
            }
        } else {
            target.runtime.success_count.store(0, Ordering::Relaxed);
            target.runtime.last_fail_at.store(now, Ordering::Relaxed);
            let failures = target.runtime.fail_count.fetch_add(1, Ordering::Relaxed) + 1;
            if target.status.get() != TargetStatus::Unhealthy && failures >= hc.unhealthy_threshold
            {
                target.status.set(TargetStatus::Unhealthy);
                metrics::set_target_health(&target.address, false);
                tracing::warn!(
                    upstream = %upstream.id,
                    target = %target.address,
                    fail_count = failures,
                    "target became unhealthy"
                );
            }
        }
    }
}

async fn probe_tcp(address: &str, timeout_secs: u64) -> bool {
    matches!(
        tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            tokio::net::TcpStream::connect(address),
        )
        .await,
        Ok(Ok(_))
    )
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
