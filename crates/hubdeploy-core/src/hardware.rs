//! Hardware resource requests.
//!
//! `HardWare` keeps the JSON shape stored on deploy rows: one optional
//! processor block per accelerator family plus CPU, memory and replicas.
//! Internally only one accelerator is meaningful, so callers go through
//! [`HardWare::accelerator`], which returns a single [`Accelerator`] chosen
//! in [`XpuKind::PRIORITY`] order.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq)]
pub enum HardwareError {
    #[error("invalid {kind} count {num:?}")]
    InvalidAcceleratorCount { kind: XpuKind, num: String },

    #[error("invalid hardware json: {0}")]
    Json(String),
}

/// Accelerator families, listed in selection priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XpuKind {
    Gpu,
    Npu,
    Gcu,
    Mlu,
    Dcu,
    #[serde(rename = "gpgpu")]
    GPGpu,
}

impl XpuKind {
    /// When a request names several families, the first one here wins.
    pub const PRIORITY: [XpuKind; 6] = [
        XpuKind::Gpu,
        XpuKind::Npu,
        XpuKind::Gcu,
        XpuKind::Mlu,
        XpuKind::Dcu,
        XpuKind::GPGpu,
    ];
}

impl fmt::Display for XpuKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            XpuKind::Gpu => "gpu",
            XpuKind::Npu => "npu",
            XpuKind::Gcu => "gcu",
            XpuKind::Mlu => "mlu",
            XpuKind::Dcu => "dcu",
            XpuKind::GPGpu => "gpgpu",
        };
        f.write_str(s)
    }
}

/// `{num, type}` pair as stored in hardware JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Processor {
    #[serde(default)]
    pub num: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

impl Processor {
    pub fn new(num: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            num: num.into(),
            kind: kind.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num.trim().is_empty()
    }
}

/// The single accelerator a request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accelerator {
    pub kind: XpuKind,
    pub num: u32,
    /// Exact node model string to match, e.g. `NVIDIA-A100`.
    pub model: String,
}

/// A resource request attached to a deploy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardWare {
    #[serde(default, skip_serializing_if = "Processor::is_empty")]
    pub gpu: Processor,
    #[serde(default, skip_serializing_if = "Processor::is_empty")]
    pub npu: Processor,
    #[serde(default, alias = "enflame", skip_serializing_if = "Processor::is_empty")]
    pub gcu: Processor,
    #[serde(default, skip_serializing_if = "Processor::is_empty")]
    pub mlu: Processor,
    #[serde(default, skip_serializing_if = "Processor::is_empty")]
    pub dcu: Processor,
    #[serde(default, skip_serializing_if = "Processor::is_empty")]
    pub gpgpu: Processor,
    #[serde(default)]
    pub cpu: Processor,
    /// Memory request, `"<N>Gi"`.
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub replicas: u32,
}

impl HardWare {
    pub fn from_json(s: &str) -> Result<Self, HardwareError> {
        serde_json::from_str(s).map_err(|e| HardwareError::Json(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        // Plain struct of strings and integers; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn processor(&self, kind: XpuKind) -> &Processor {
        match kind {
            XpuKind::Gpu => &self.gpu,
            XpuKind::Npu => &self.npu,
            XpuKind::Gcu => &self.gcu,
            XpuKind::Mlu => &self.mlu,
            XpuKind::Dcu => &self.dcu,
            XpuKind::GPGpu => &self.gpgpu,
        }
    }

    fn processor_mut(&mut self, kind: XpuKind) -> &mut Processor {
        match kind {
            XpuKind::Gpu => &mut self.gpu,
            XpuKind::Npu => &mut self.npu,
            XpuKind::Gcu => &mut self.gcu,
            XpuKind::Mlu => &mut self.mlu,
            XpuKind::Dcu => &mut self.dcu,
            XpuKind::GPGpu => &mut self.gpgpu,
        }
    }

    /// Accelerator families with a non-empty count, in priority order.
    pub fn populated_accelerators(&self) -> Vec<XpuKind> {
        XpuKind::PRIORITY
            .into_iter()
            .filter(|kind| !self.processor(*kind).is_empty())
            .collect()
    }

    /// Families that are populated but ignored because a higher-priority
    /// family is also set. Non-empty means the request is ambiguous.
    pub fn shadowed_accelerators(&self) -> Vec<XpuKind> {
        self.populated_accelerators().into_iter().skip(1).collect()
    }

    /// The accelerator that governs matching, if any.
    pub fn accelerator(&self) -> Result<Option<Accelerator>, HardwareError> {
        let populated = self.populated_accelerators();
        let Some(&kind) = populated.first() else {
            return Ok(None);
        };
        if populated.len() > 1 {
            warn!(
                selected = %kind,
                ignored = ?&populated[1..],
                "hardware request names several accelerator families"
            );
        }
        let processor = self.processor(kind);
        let num = processor.num.trim().parse::<u32>().map_err(|_| {
            HardwareError::InvalidAcceleratorCount {
                kind,
                num: processor.num.clone(),
            }
        })?;
        Ok(Some(Accelerator {
            kind,
            num,
            model: processor.kind.clone(),
        }))
    }

    /// Replace every accelerator block with the given one.
    pub fn set_accelerator(&mut self, accelerator: Option<Accelerator>) {
        for kind in XpuKind::PRIORITY {
            *self.processor_mut(kind) = Processor::default();
        }
        if let Some(acc) = accelerator {
            *self.processor_mut(acc.kind) = Processor::new(acc.num.to_string(), acc.model);
        }
    }

    /// Requested replica count, never less than one.
    pub fn replica_count(&self) -> u32 {
        self.replicas.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu_request(num: &str) -> HardWare {
        HardWare {
            gpu: Processor::new(num, "NVIDIA-A100"),
            cpu: Processor::new("8", ""),
            memory: "10Gi".to_string(),
            replicas: 1,
            ..Default::default()
        }
    }

    #[test]
    fn no_accelerator_for_cpu_only_request() {
        let hw = HardWare {
            cpu: Processor::new("800m", ""),
            memory: "2Gi".to_string(),
            ..Default::default()
        };
        assert_eq!(hw.accelerator().unwrap(), None);
    }

    #[test]
    fn gpu_wins_over_npu() {
        let mut hw = gpu_request("1");
        hw.npu = Processor::new("2", "Ascend-910B");
        let acc = hw.accelerator().unwrap().unwrap();
        assert_eq!(acc.kind, XpuKind::Gpu);
        assert_eq!(acc.num, 1);
        assert_eq!(hw.shadowed_accelerators(), vec![XpuKind::Npu]);
    }

    #[test]
    fn priority_order_skips_empty_families() {
        let hw = HardWare {
            mlu: Processor::new("4", "MLU370"),
            gpgpu: Processor::new("1", "BI-V100"),
            ..Default::default()
        };
        let acc = hw.accelerator().unwrap().unwrap();
        assert_eq!(acc.kind, XpuKind::Mlu);
        assert_eq!(acc.model, "MLU370");
    }

    #[test]
    fn bad_count_is_an_error() {
        let hw = gpu_request("two");
        assert!(matches!(
            hw.accelerator(),
            Err(HardwareError::InvalidAcceleratorCount { kind: XpuKind::Gpu, .. })
        ));
    }

    #[test]
    fn json_shape_accepts_enflame_alias() {
        let json = r#"{"enflame":{"num":"1","type":"S60"},"cpu":{"num":"4"},"memory":"16Gi","replicas":2}"#;
        let hw = HardWare::from_json(json).unwrap();
        assert_eq!(hw.gcu, Processor::new("1", "S60"));
        assert_eq!(hw.replica_count(), 2);
        assert!(hw.to_json().contains("\"gcu\""));
    }

    #[test]
    fn set_accelerator_clears_other_families() {
        let mut hw = gpu_request("1");
        hw.npu = Processor::new("1", "Ascend");
        hw.set_accelerator(Some(Accelerator {
            kind: XpuKind::Dcu,
            num: 2,
            model: "K100".to_string(),
        }));
        assert_eq!(hw.populated_accelerators(), vec![XpuKind::Dcu]);
        assert_eq!(hw.dcu.num, "2");
    }

    #[test]
    fn zero_replicas_counts_as_one() {
        assert_eq!(HardWare::default().replica_count(), 1);
    }
}
