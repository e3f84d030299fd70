//! Cluster membership and health tracking
//!
//! The registry records which node addresses are known and when each
//! was last heard from. A node that misses one health window becomes
//! Suspect; after two windows it is removed outright. The registry is
//! deliberately decoupled from the hash ring; the server keeps both in
//! sync when peers join or leave.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::sweep::{self, SweepGuard};

/// Liveness state of a known node.
///
/// There is no stored Dead state: a node that misses two health
/// windows is removed from the registry in the same sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Alive,
    Suspect,
}

/// Membership record for one node.
#[derive(Debug, Clone)]
struct NodeInfo {
    status: NodeStatus,
    last_heartbeat: Instant,
}

impl NodeInfo {
    fn alive_now() -> Self {
        Self {
            status: NodeStatus::Alive,
            last_heartbeat: Instant::now(),
        }
    }
}

/// Tracks known nodes and demotes stale ones on a fixed cadence.
///
/// Cloning yields another handle to the same registry. The health
/// sweep runs at the health-timeout interval for as long as any
/// handle is alive.
#[derive(Clone)]
pub struct Registry {
    nodes: Arc<RwLock<HashMap<String, NodeInfo>>>,
    _sweeper: Arc<SweepGuard>,
}

impl Registry {
    /// Create a registry that suspects nodes after `health_timeout` of
    /// silence and removes them after twice that.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(health_timeout: Duration) -> Self {
        let nodes = Arc::new(RwLock::new(HashMap::new()));
        let sweeper = sweep::spawn(health_timeout, &nodes, move |nodes| {
            check_health(nodes, health_timeout)
        });
        Self {
            nodes,
            _sweeper: Arc::new(sweeper),
        }
    }

    /// Add a node, or refresh its heartbeat if it is already known.
    pub fn register(&self, addr: &str) {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(addr) {
            Some(node) => {
                node.last_heartbeat = Instant::now();
                node.status = NodeStatus::Alive;
            }
            None => {
                info!("registered node {}", addr);
                nodes.insert(addr.to_string(), NodeInfo::alive_now());
            }
        }
    }

    /// Refresh a node's last-seen time, reviving it if it was Suspect.
    /// Unknown addresses are ignored.
    pub fn heartbeat(&self, addr: &str) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(addr) {
            node.last_heartbeat = Instant::now();
            if node.status == NodeStatus::Suspect {
                info!("node {} recovered from suspect", addr);
                node.status = NodeStatus::Alive;
            }
        }
    }

    /// Remove a node unconditionally. Removing an absent node is not an error.
    pub fn unregister(&self, addr: &str) {
        if self.nodes.write().remove(addr).is_some() {
            info!("unregistered node {}", addr);
        }
    }

    /// Addresses of all nodes currently Alive. Suspect nodes are
    /// present in the registry but excluded here.
    pub fn alive_nodes(&self) -> Vec<String> {
        self.nodes
            .read()
            .iter()
            .filter(|(_, node)| node.status == NodeStatus::Alive)
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Whether the address is known at all, in any state.
    pub fn contains(&self, addr: &str) -> bool {
        self.nodes.read().contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

/// One health pass over every node.
///
/// Both thresholds are evaluated together so a doubly-stale node is
/// removed directly instead of lingering as Suspect for another pass.
fn check_health(nodes: &RwLock<HashMap<String, NodeInfo>>, timeout: Duration) {
    let now = Instant::now();
    let mut nodes = nodes.write();
    nodes.retain(|addr, node| {
        let silence = now.saturating_duration_since(node.last_heartbeat);
        if silence > timeout * 2 {
            warn!("node {} missed two health windows, removing", addr);
            return false;
        }
        if silence > timeout && node.status == NodeStatus::Alive {
            warn!("node {} missed a health window, marking suspect", addr);
            node.status = NodeStatus::Suspect;
        } else {
            debug!("node {} healthy ({:?} since heartbeat)", addr, silence);
        }
        true
    });
}
