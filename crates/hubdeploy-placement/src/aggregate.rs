//! Cluster capacity roll-ups.
//!
//! Turns a runner's per-node snapshot into cluster totals and usage ratios,
//! after taking accelerators held by pending reservations off the nodes.

use std::collections::BTreeSet;

use hubdeploy_core::{ClusterRes, ClusterResponse, ClusterStatus, NodeResourceInfo};
use hubdeploy_state::UserResources;
use tracing::debug;

/// Take reserved accelerators off node availability.
///
/// Each reservation is charged once, to the first node whose model matches
/// (an empty reservation model matches any node) and that still has enough
/// free accelerators. A reservation no node can cover is left uncharged.
pub fn apply_reservations(nodes: &mut [NodeResourceInfo], reservations: &[UserResources]) {
    for res in reservations.iter().filter(|r| r.xpu_num > 0) {
        let target = nodes.iter_mut().find(|node| {
            (res.xpu_model.is_empty() || node.xpu_model == res.xpu_model)
                && node.available_xpu >= res.xpu_num
        });
        match target {
            Some(node) => {
                node.available_xpu -= res.xpu_num;
                node.reserved_xpu += res.xpu_num;
            }
            None => debug!(
                order_detail_id = res.order_detail_id,
                xpu_num = res.xpu_num,
                "reservation exceeds free accelerators on every node"
            ),
        }
    }
}

/// `(total - available) / total`, clamped to `[0, 1]`; 0 when `total` is 0.
pub fn usage_ratio(total: f64, available: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    ((total - available) / total).clamp(0.0, 1.0)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Cluster view with totals and usage over `nodes`.
pub fn rollup(resp: &ClusterResponse, nodes: Vec<NodeResourceInfo>) -> ClusterRes {
    let mut res = ClusterRes {
        cluster_id: resp.cluster_id.clone(),
        region: resp.region.clone(),
        zone: resp.zone.clone(),
        provider: resp.provider.clone(),
        status: ClusterStatus::Running,
        resource_status: resp.resource_status,
        node_number: nodes.len(),
        ..Default::default()
    };
    for node in &nodes {
        res.cpu_capacity += node.total_cpu;
        res.cpu_available += node.available_cpu;
        res.mem_capacity += node.total_mem;
        res.mem_available += node.available_mem;
        res.xpu_capacity += node.total_xpu;
        res.xpu_available += node.available_xpu;
    }
    res.cpu_usage = usage_ratio(res.cpu_capacity, res.cpu_available);
    res.mem_usage = usage_ratio(res.mem_capacity, res.mem_available);
    res.xpu_usage = usage_ratio(res.xpu_capacity as f64, res.xpu_available as f64);
    res.resources = nodes;
    res
}

/// Dashboard summary: floored availability, usage to two decimals, and
/// the accelerator vendors and models present. Node details are dropped.
pub fn usage_summary(resp: &ClusterResponse) -> ClusterRes {
    let mut res = rollup(resp, resp.nodes.clone());

    let mut vendors = BTreeSet::new();
    let mut models = BTreeSet::new();
    for node in &res.resources {
        if !node.gpu_vendor.is_empty() {
            vendors.insert(node.gpu_vendor.clone());
            models.insert(format!("{}({})", node.xpu_model, node.xpu_mem));
        }
    }
    res.xpu_vendors = vendors.into_iter().collect::<Vec<_>>().join(", ");
    res.xpu_models = models.into_iter().collect::<Vec<_>>().join(", ");

    res.cpu_available = res.cpu_available.floor();
    res.mem_capacity = res.mem_capacity.floor();
    res.mem_available = res.mem_available.floor();
    res.cpu_usage = round2(usage_ratio(res.cpu_capacity, res.cpu_available));
    res.mem_usage = round2(usage_ratio(res.mem_capacity, res.mem_available));
    res.xpu_usage = round2(res.xpu_usage);
    res.resources.clear();
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(model: &str, total_xpu: i64, available_xpu: i64) -> NodeResourceInfo {
        NodeResourceInfo {
            total_cpu: 16.0,
            available_cpu: 8.0,
            total_mem: 64.0,
            available_mem: 48.0,
            xpu_model: model.to_string(),
            gpu_vendor: if model.is_empty() { String::new() } else { "NVIDIA".to_string() },
            xpu_mem: "80Gi".to_string(),
            total_xpu,
            available_xpu,
            ..Default::default()
        }
    }

    fn reservation(xpu_num: i64, model: &str) -> UserResources {
        UserResources {
            order_detail_id: 1,
            xpu_num,
            xpu_model: model.to_string(),
            ..Default::default()
        }
    }

    fn response(nodes: Vec<NodeResourceInfo>) -> ClusterResponse {
        ClusterResponse {
            cluster_id: "c1".to_string(),
            region: "east".to_string(),
            nodes,
            ..Default::default()
        }
    }

    #[test]
    fn reservation_charged_to_one_node() {
        let mut nodes = vec![node("A100", 4, 4), node("A100", 4, 4)];
        apply_reservations(&mut nodes, &[reservation(2, "A100")]);
        assert_eq!(nodes[0].available_xpu, 2);
        assert_eq!(nodes[0].reserved_xpu, 2);
        assert_eq!(nodes[1].available_xpu, 4);
    }

    #[test]
    fn reservation_skips_nodes_without_room_or_model() {
        let mut nodes = vec![node("H100", 8, 8), node("A100", 4, 1), node("A100", 4, 3)];
        apply_reservations(&mut nodes, &[reservation(2, "A100")]);
        assert_eq!(nodes[0].available_xpu, 8);
        assert_eq!(nodes[1].available_xpu, 1);
        assert_eq!(nodes[2].available_xpu, 1);
    }

    #[test]
    fn oversized_reservation_is_not_charged() {
        let mut nodes = vec![node("A100", 2, 2)];
        apply_reservations(&mut nodes, &[reservation(4, "")]);
        assert_eq!(nodes[0].available_xpu, 2);
        assert_eq!(nodes[0].reserved_xpu, 0);
    }

    #[test]
    fn usage_ratio_bounds() {
        assert_eq!(usage_ratio(0.0, 0.0), 0.0);
        assert_eq!(usage_ratio(10.0, 10.0), 0.0);
        assert_eq!(usage_ratio(10.0, 0.0), 1.0);
        assert_eq!(usage_ratio(10.0, 12.0), 0.0);
        assert_eq!(usage_ratio(10.0, -2.0), 1.0);
    }

    #[test]
    fn rollup_sums_nodes() {
        let res = rollup(&response(vec![]), vec![node("A100", 4, 1), node("A100", 4, 3)]);
        assert_eq!(res.status, ClusterStatus::Running);
        assert_eq!(res.node_number, 2);
        assert_eq!(res.cpu_capacity, 32.0);
        assert_eq!(res.xpu_capacity, 8);
        assert_eq!(res.xpu_available, 4);
        assert_eq!(res.xpu_usage, 0.5);
        assert_eq!(res.mem_usage, 0.25);
        assert_eq!(res.resources.len(), 2);
    }

    #[test]
    fn rollup_of_empty_cluster_has_zero_usage() {
        let res = rollup(&response(vec![]), Vec::new());
        assert_eq!(res.cpu_usage, 0.0);
        assert_eq!(res.mem_usage, 0.0);
        assert_eq!(res.xpu_usage, 0.0);
    }

    #[test]
    fn usage_summary_lists_vendors_and_models() {
        let mut cpu_only = node("", 0, 0);
        cpu_only.available_cpu = 7.6;
        let res = usage_summary(&response(vec![node("A100", 4, 1), cpu_only]));
        assert_eq!(res.xpu_vendors, "NVIDIA");
        assert_eq!(res.xpu_models, "A100(80Gi)");
        assert_eq!(res.cpu_available, 15.0);
        assert_eq!(res.cpu_usage, 0.53);
        assert_eq!(res.xpu_usage, 0.75);
        assert!(res.resources.is_empty());
        assert_eq!(res.node_number, 2);
    }
}
