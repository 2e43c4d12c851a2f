//! Coordinator resource serving spooled segment downloads.
//!
//! A download request resolves in a fixed order: redirect straight to the
//! storage backend when it exposes direct URIs, otherwise redirect to a
//! worker node chosen round-robin, otherwise stream the segment bytes from
//! the coordinator itself.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::bridge::SpoolingManagerBridge;

/// URI path under which segments are served.
pub const SEGMENTS_PATH: &str = "/v1/spooled/segments";

/// Build the download URI for a segment identifier on the given authority.
pub fn spooled_segment_uri(authority: &str, identifier: &str) -> String {
    format!("http://{authority}{SEGMENTS_PATH}/{identifier}")
}

/// Network location of a cluster node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeLocation {
    pub host: String,
    pub port: u16,
}

impl NodeLocation {
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Cluster membership view consulted per download request.
pub trait ClusterNodes: Send + Sync {
    /// Currently active worker nodes. Order must be stable between calls
    /// for round-robin distribution to be even.
    fn active_nodes(&self) -> Vec<NodeLocation>;

    /// Whether this process is the coordinator.
    fn is_coordinator(&self) -> bool;
}

/// Fixed membership, used for single-node deployments and tests.
pub struct StaticClusterNodes {
    nodes: Vec<NodeLocation>,
    coordinator: bool,
}

impl StaticClusterNodes {
    pub fn new(nodes: Vec<NodeLocation>, coordinator: bool) -> Self {
        Self { nodes, coordinator }
    }

    /// A coordinator-only cluster with no workers.
    pub fn coordinator_only() -> Self {
        Self::new(Vec::new(), true)
    }
}

impl ClusterNodes for StaticClusterNodes {
    fn active_nodes(&self) -> Vec<NodeLocation> {
        self.nodes.clone()
    }

    fn is_coordinator(&self) -> bool {
        self.coordinator
    }
}

/// Outcome of a download request.
pub enum SegmentDownload {
    /// Client should re-request the segment at this URI.
    Redirect(String),
    /// Segment bytes, streamed from local storage.
    Stream(Box<dyn Read + Send>),
}

/// Serves the segment download/acknowledge surface.
pub struct SegmentResource {
    bridge: Arc<SpoolingManagerBridge>,
    cluster: Arc<dyn ClusterNodes>,
    use_workers: bool,
    direct_storage_access: bool,
    next_worker: AtomicU64,
}

impl SegmentResource {
    pub fn new(
        bridge: Arc<SpoolingManagerBridge>,
        cluster: Arc<dyn ClusterNodes>,
        use_workers: bool,
        direct_storage_access: bool,
    ) -> Self {
        Self {
            bridge,
            cluster,
            use_workers,
            direct_storage_access,
            next_worker: AtomicU64::new(0),
        }
    }

    /// Resolve a download request for the identifier.
    pub fn download(&self, identifier: &str) -> anyhow::Result<SegmentDownload> {
        if self.direct_storage_access {
            if let Some(location) = self.bridge.direct_location(identifier)? {
                return Ok(SegmentDownload::Redirect(location));
            }
        }
        if self.use_workers && self.cluster.is_coordinator() {
            if let Some(worker) = self.next_active_node() {
                return Ok(SegmentDownload::Redirect(spooled_segment_uri(
                    &worker.authority(),
                    identifier,
                )));
            }
        }
        Ok(SegmentDownload::Stream(
            self.bridge.open_input_stream(identifier)?,
        ))
    }

    /// Remove the segment after the client has consumed it.
    pub fn acknowledge(&self, identifier: &str) -> anyhow::Result<()> {
        self.bridge.drop_segment(identifier)
    }

    /// Next worker in round-robin order, or `None` when the cluster has no
    /// active workers.
    fn next_active_node(&self) -> Option<NodeLocation> {
        let nodes = self.cluster.active_nodes();
        if nodes.is_empty() {
            return None;
        }
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) as usize % nodes.len();
        Some(nodes[index].clone())
    }
}
