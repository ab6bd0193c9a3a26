//! Hardware matcher.
//!
//! Decides whether nodes can host a [`HardWare`] request. A node fits when
//! its free CPU, free memory and (if requested) free accelerators of the
//! exact requested model all cover the request. Multi-replica requests need
//! that many distinct nodes that each fit on their own; capacity is never
//! pooled across nodes.

use hubdeploy_core::{Accelerator, HardWare, NodeResourceInfo};
use tracing::{debug, warn};

use crate::error::PlacementResult;
use crate::quantity::{parse_cpu_cores, parse_memory_gib};

/// A hardware request with every quantity parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    pub cpu_cores: f64,
    pub mem_gib: f64,
    pub accelerator: Option<Accelerator>,
    pub replicas: u32,
}

impl ResourceRequest {
    /// Parse a request. An empty CPU field requests no CPU; memory is
    /// mandatory.
    pub fn from_hardware(hw: &HardWare) -> PlacementResult<Self> {
        let cpu_cores = if hw.cpu.is_empty() {
            0.0
        } else {
            parse_cpu_cores(&hw.cpu.num)?
        };
        Ok(Self {
            cpu_cores,
            mem_gib: parse_memory_gib(&hw.memory)?,
            accelerator: hw.accelerator()?,
            replicas: hw.replica_count(),
        })
    }

    /// Whether a single node can host one replica.
    pub fn fits(&self, node: &NodeResourceInfo) -> bool {
        if self.mem_gib > node.available_mem {
            return false;
        }
        if self.cpu_cores > node.available_cpu {
            return false;
        }
        match &self.accelerator {
            None => true,
            Some(acc) => i64::from(acc.num) <= node.available_xpu && acc.model == node.xpu_model,
        }
    }
}

/// Whether `node` satisfies `hw`. Unparsable requests never fit.
pub fn fits(node: &NodeResourceInfo, hw: &HardWare) -> bool {
    match ResourceRequest::from_hardware(hw) {
        Ok(req) => req.fits(node),
        Err(e) => {
            warn!(error = %e, "hardware request rejected");
            false
        }
    }
}

/// Nodes that could each host one replica of `req`.
pub fn count_fitting_nodes(nodes: &[NodeResourceInfo], req: &ResourceRequest) -> usize {
    nodes.iter().filter(|node| req.fits(node)).count()
}

/// At least one node fits.
pub fn check_single_node(nodes: &[NodeResourceInfo], req: &ResourceRequest) -> bool {
    nodes.iter().any(|node| req.fits(node))
}

/// At least `req.replicas` distinct nodes fit.
pub fn check_multi_node(nodes: &[NodeResourceInfo], req: &ResourceRequest) -> bool {
    let fitting = count_fitting_nodes(nodes, req);
    debug!(fitting, replicas = req.replicas, "multi-node fit");
    fitting >= req.replicas as usize
}

/// Full capacity check for a request against a cluster's nodes.
pub fn check_resource(nodes: &[NodeResourceInfo], hw: &HardWare) -> bool {
    let req = match ResourceRequest::from_hardware(hw) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "hardware request rejected");
            return false;
        }
    };
    if req.replicas > 1 {
        check_multi_node(nodes, &req)
    } else {
        check_single_node(nodes, &req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubdeploy_core::Processor;

    fn a100_node(name: &str) -> NodeResourceInfo {
        NodeResourceInfo {
            node_name: name.to_string(),
            total_cpu: 16.0,
            available_cpu: 16.0,
            total_mem: 100.0,
            available_mem: 100.0,
            xpu_model: "NVIDIA-A100".to_string(),
            total_xpu: 2,
            available_xpu: 2,
            ..Default::default()
        }
    }

    fn a100_request(replicas: u32) -> HardWare {
        HardWare {
            gpu: Processor::new("1", "NVIDIA-A100"),
            cpu: Processor::new("8", ""),
            memory: "10Gi".to_string(),
            replicas,
            ..Default::default()
        }
    }

    fn cpu_request(cpu: &str, memory: &str) -> HardWare {
        HardWare {
            cpu: Processor::new(cpu, ""),
            memory: memory.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn memory_decides_fit() {
        let mut node = a100_node("n1");
        node.available_mem = 8.0;
        assert!(!fits(&node, &cpu_request("1", "10Gi")));
        node.available_mem = 100.0;
        assert!(fits(&node, &cpu_request("1", "10Gi")));
    }

    #[test]
    fn millicpu_request_fits_fractional_node() {
        let mut node = a100_node("n1");
        node.available_cpu = 0.9;
        assert!(fits(&node, &cpu_request("800m", "1Gi")));
        node.available_cpu = 0.5;
        assert!(!fits(&node, &cpu_request("800m", "1Gi")));
    }

    #[test]
    fn accelerator_model_must_match_exactly() {
        let node = a100_node("n1");
        assert!(fits(&node, &a100_request(1)));

        let mut hw = a100_request(1);
        hw.gpu.kind = "NVIDIA-A100-80G".to_string();
        assert!(!fits(&node, &hw));
    }

    #[test]
    fn accelerator_count_limited_by_available() {
        let mut node = a100_node("n1");
        node.available_xpu = 0;
        assert!(!fits(&node, &a100_request(1)));
    }

    #[test]
    fn cpu_only_request_ignores_accelerators() {
        let mut node = a100_node("n1");
        node.available_xpu = 0;
        node.xpu_model.clear();
        assert!(fits(&node, &cpu_request("4", "4Gi")));
    }

    #[test]
    fn higher_priority_accelerator_governs() {
        let node = a100_node("n1");
        let mut hw = a100_request(1);
        hw.npu = Processor::new("8", "Ascend-910B");
        assert!(fits(&node, &hw));
    }

    #[test]
    fn unparsable_fields_fail_closed() {
        let node = a100_node("n1");
        assert!(!fits(&node, &cpu_request("1", "lots")));
        assert!(!fits(&node, &cpu_request("1", "")));
        assert!(!fits(&node, &cpu_request("many", "1Gi")));
        let mut hw = a100_request(1);
        hw.gpu.num = "one".to_string();
        assert!(!fits(&node, &hw));
    }

    #[test]
    fn multi_node_counts_whole_nodes() {
        let nodes = vec![a100_node("n1"), a100_node("n2"), a100_node("n3")];
        assert!(check_resource(&nodes, &a100_request(2)));
        assert!(check_resource(&nodes, &a100_request(3)));
        assert!(!check_resource(&nodes, &a100_request(4)));
    }

    #[test]
    fn multi_node_does_not_pool_capacity() {
        let mut small = a100_node("n1");
        small.available_mem = 6.0;
        let mut other = a100_node("n2");
        other.available_mem = 6.0;
        // 12Gi free in total, but no single node has 10Gi.
        assert!(!check_resource(&[small, other], &a100_request(2)));
    }

    #[test]
    fn single_replica_needs_any_node() {
        let mut busy = a100_node("n1");
        busy.available_cpu = 1.0;
        let free = a100_node("n2");
        assert!(check_resource(&[busy.clone(), free], &a100_request(1)));
        assert!(!check_resource(&[busy], &a100_request(1)));
        assert!(!check_resource(&[], &a100_request(1)));
    }

    #[test]
    fn check_is_repeatable() {
        let nodes = vec![a100_node("n1"), a100_node("n2")];
        let hw = a100_request(2);
        assert_eq!(check_resource(&nodes, &hw), check_resource(&nodes, &hw));
    }
}
