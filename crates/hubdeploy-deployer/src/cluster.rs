//! Cluster queries on the deployer.

use hubdeploy_core::{ClusterRes, ClusterResponse, ClusterStatus, HardWare, ResourceStatus, epoch_secs};
use hubdeploy_placement::{rollup, usage_summary};
use tracing::{debug, warn};

use crate::deployer::Deployer;
use crate::error::{DeployerError, DeployerResult};

/// Whether some node (or set of nodes, for multi-replica requests) of
/// `cluster` can host `hw`.
pub fn check_resource(cluster: &ClusterRes, hw: &HardWare) -> bool {
    hubdeploy_placement::check_resource(&cluster.resources, hw)
}

impl Deployer {
    pub async fn list_cluster(&self) -> DeployerResult<Vec<ClusterResponse>> {
        Ok(self.ctx.runner.list_cluster().await?)
    }

    /// Live view of a cluster with pending reservations taken off its nodes.
    /// A failed probe yields an `Unavailable` placeholder, not an error.
    pub async fn get_cluster_by_id(&self, cluster_id: &str) -> DeployerResult<ClusterRes> {
        let resp = match self.ctx.runner.get_cluster_by_id(cluster_id).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(cluster_id, error = %e, "cluster probe failed");
                return Ok(ClusterRes::unavailable(cluster_id));
            }
        };
        let mut nodes = resp.nodes.clone();
        self.ledger.reserve_nodes(cluster_id, &mut nodes)?;
        let mut res = rollup(&resp, nodes);
        res.last_update_time = epoch_secs();
        Ok(res)
    }

    /// Usage summary for dashboards. Unlike [`get_cluster_by_id`](Self::get_cluster_by_id)
    /// a failed probe is an error.
    pub async fn get_cluster_usage_by_id(&self, cluster_id: &str) -> DeployerResult<ClusterRes> {
        let resp = self.ctx.runner.get_cluster_by_id(cluster_id).await?;
        Ok(usage_summary(&resp))
    }

    /// Check that `hw` can be placed on the cluster. Without a cluster id
    /// the first listed cluster is used. Returns `Ok(true)` or the reason
    /// it cannot.
    pub async fn check_resource_available(
        &self,
        cluster_id: Option<&str>,
        order_detail_id: u64,
        hw: &HardWare,
    ) -> DeployerResult<bool> {
        let cluster_id = match cluster_id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self
                .list_cluster()
                .await?
                .into_iter()
                .next()
                .map(|c| c.cluster_id)
                .ok_or(DeployerError::NoCluster)?,
        };

        let cluster = self.get_cluster_by_id(&cluster_id).await?;
        self.ledger.check_order_detail(order_detail_id, 0)?;

        if cluster.status == ClusterStatus::Unavailable {
            return Err(DeployerError::ClusterUnavailable(cluster_id));
        }
        if cluster.resource_status == ResourceStatus::Uncertain {
            debug!(cluster_id = %cluster_id, "resource status uncertain, skipping fit check");
            return Ok(true);
        }
        if !check_resource(&cluster, hw) {
            return Err(DeployerError::NotEnoughResource(cluster_id));
        }
        Ok(true)
    }

    /// Whether the cluster missed its heartbeat window. Unavailable
    /// clusters count as timed out.
    pub fn check_heartbeat_timeout(&self, cluster_id: &str) -> DeployerResult<bool> {
        let info = self
            .store()
            .cluster_info_by_cluster_id(cluster_id)?
            .ok_or_else(|| DeployerError::ClusterNotFound(cluster_id.to_string()))?;
        if info.status == ClusterStatus::Unavailable {
            return Ok(true);
        }
        let timeout = self.ctx.deploy.heartbeat_timeout_secs();
        Ok(epoch_secs().saturating_sub(info.updated_at) > timeout)
    }
}
