//! Server configuration

use std::time::Duration;

use crate::ring::DEFAULT_REPLICAS;

/// Tunables for one cache node.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address. Port 0 binds an ephemeral port; the server then
    /// advertises the actual bound address.
    pub addr: String,
    /// Virtual replicas per node on the hash ring.
    pub replicas: usize,
    /// Cadence of the cache expiry sweep.
    pub cleanup_interval: Duration,
    /// Health window: silence beyond one window marks a node Suspect,
    /// beyond two removes it.
    pub health_timeout: Duration,
}

impl ServerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7000".to_string(),
            replicas: DEFAULT_REPLICAS,
            cleanup_interval: Duration::from_secs(5),
            health_timeout: Duration::from_secs(10),
        }
    }
}
