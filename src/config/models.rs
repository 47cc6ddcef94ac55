//! Bootstrap configuration for the gateway process.
//!
//! This only covers process-level settings (listeners, store endpoints,
//! global middleware options). Routes and upstreams are dynamic entities
//! owned by the config store, not by this file.
use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_admin_addr() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_endpoints() -> Vec<String> {
    vec!["localhost:2379".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Connection settings for the config store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub endpoints: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
        }
    }
}

/// Per-client-IP token bucket applied to the whole data plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub per_second: u32,
    /// Bucket size; defaults to `per_second` when left at zero.
    #[serde(default)]
    pub burst: u32,
}

impl RateLimitConfig {
    pub fn effective_burst(&self) -> u32 {
        if self.burst == 0 {
            self.per_second
        } else {
            self.burst
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Emit JSON log lines instead of the pretty console format.
    pub json: bool,
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Data-plane listener.
    pub listen_addr: String,
    /// Admin-plane listener.
    pub admin_addr: String,
    pub store: StoreConfig,
    /// Enables the JWT middleware when set.
    pub jwt_secret: Option<String>,
    /// Enables the rate-limit middleware when set.
    pub rate_limit: Option<RateLimitConfig>,
    pub log: LogConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_addr: default_admin_addr(),
            store: StoreConfig::default(),
            jwt_secret: None,
            rate_limit: None,
            log: LogConfig::default(),
        }
    }
}
