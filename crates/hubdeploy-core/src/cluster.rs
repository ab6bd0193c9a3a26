//! Cluster and node capacity snapshots as reported by the image runner.

use serde::{Deserialize, Serialize};

/// Live health of a cluster as seen by the last probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterStatus {
    #[default]
    Running,
    Unavailable,
}

/// How trustworthy the per-node numbers in a snapshot are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    /// Node numbers describe the whole cluster.
    #[default]
    ClusterWide,
    /// Numbers are bounded by a namespace quota.
    NamespaceQuota,
    /// No reliable per-node data; fit checks are skipped.
    Uncertain,
}

/// Virtual slice of an accelerator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vxpu {
    pub id: String,
    pub total_mem_mib: u64,
    pub available_mem_mib: u64,
}

/// Capacity snapshot for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeResourceInfo {
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub node_status: String,
    /// Cores.
    pub total_cpu: f64,
    pub available_cpu: f64,
    /// GiB.
    pub total_mem: f64,
    pub available_mem: f64,
    #[serde(default)]
    pub xpu_model: String,
    #[serde(default)]
    pub gpu_vendor: String,
    #[serde(default)]
    pub total_xpu: i64,
    #[serde(default)]
    pub available_xpu: i64,
    /// Accelerators held by reservations that are not yet running.
    #[serde(default)]
    pub reserved_xpu: i64,
    #[serde(default)]
    pub xpu_mem: String,
    #[serde(default)]
    pub vxpus: Vec<Vxpu>,
}

/// Aggregated view of a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterRes {
    pub cluster_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub status: ClusterStatus,
    #[serde(default)]
    pub resource_status: ResourceStatus,
    #[serde(default)]
    pub resources: Vec<NodeResourceInfo>,
    #[serde(default)]
    pub node_number: usize,
    #[serde(default)]
    pub cpu_capacity: f64,
    #[serde(default)]
    pub cpu_available: f64,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub mem_capacity: f64,
    #[serde(default)]
    pub mem_available: f64,
    #[serde(default)]
    pub mem_usage: f64,
    #[serde(default)]
    pub xpu_capacity: i64,
    #[serde(default)]
    pub xpu_available: i64,
    #[serde(default)]
    pub xpu_usage: f64,
    #[serde(default)]
    pub last_update_time: u64,
    /// Comma-separated accelerator vendors present in the cluster.
    #[serde(default)]
    pub xpu_vendors: String,
    /// Comma-separated `model(memory)` entries.
    #[serde(default)]
    pub xpu_models: String,
}

/// Raw cluster probe result from the image runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterResponse {
    pub cluster_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub resource_status: ResourceStatus,
    #[serde(default)]
    pub nodes: Vec<NodeResourceInfo>,
}

impl ClusterRes {
    /// Placeholder returned when the live probe fails.
    pub fn unavailable(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            status: ClusterStatus::Unavailable,
            ..Default::default()
        }
    }

    pub fn is_available(&self) -> bool {
        self.status != ClusterStatus::Unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_placeholder_has_no_nodes() {
        let res = ClusterRes::unavailable("c1");
        assert_eq!(res.cluster_id, "c1");
        assert!(!res.is_available());
        assert!(res.resources.is_empty());
    }

    #[test]
    fn node_snapshot_tolerates_missing_optional_fields() {
        let json = r#"{"total_cpu":16,"available_cpu":8.5,"total_mem":64,"available_mem":32}"#;
        let node: NodeResourceInfo = serde_json::from_str(json).unwrap();
        assert_eq!(node.available_cpu, 8.5);
        assert_eq!(node.available_xpu, 0);
        assert!(node.xpu_model.is_empty());
    }
}
