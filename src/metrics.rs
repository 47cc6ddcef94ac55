//! Metric names and recording helpers built on the `metrics` facade.
//!
//! No exporter is embedded; the binary may install any compatible
//! recorder. Helpers are no-ops when none is installed.
use std::time::Duration;

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const REQUESTS_TOTAL: &str = "synapse_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "synapse_request_duration_seconds";
pub const TARGET_HEALTH_STATUS: &str = "synapse_target_health_status";
pub const SELECTION_FAILURES_TOTAL: &str = "synapse_selection_failures_total";

static DESCRIBE: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        REQUESTS_TOTAL,
        Unit::Count,
        "Requests handled by the data plane, labeled by status."
    );
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "End-to-end latency of data-plane requests."
    );
    describe_gauge!(
        TARGET_HEALTH_STATUS,
        "Per-target health (1 healthy, 0 unhealthy)."
    );
    describe_counter!(
        SELECTION_FAILURES_TOTAL,
        Unit::Count,
        "Selections that found no healthy target, labeled by upstream."
    );
});

pub fn record_request(status: u16, duration: Duration) {
    Lazy::force(&DESCRIBE);
    counter!(REQUESTS_TOTAL, "status" => status.to_string()).increment(1);
    histogram!(REQUEST_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn set_target_health(address: &str, healthy: bool) {
    Lazy::force(&DESCRIBE);
    gauge!(TARGET_HEALTH_STATUS, "target" => address.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_selection_failure(upstream_id: &str) {
    Lazy::force(&DESCRIBE);
    counter!(SELECTION_FAILURES_TOTAL, "upstream" => upstream_id.to_string()).increment(1);
}
