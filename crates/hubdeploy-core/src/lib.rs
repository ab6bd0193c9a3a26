//! hubdeploy-core — shared configuration and domain types.
//!
//! Everything here is plain data: the TOML configuration, hardware
//! requests, cluster capacity snapshots, and deploy log entries. The other
//! crates build scheduling and persistence on top of these.

pub mod cluster;
pub mod config;
pub mod hardware;
pub mod logs;
pub mod types;

pub use cluster::{
    ClusterRes, ClusterResponse, ClusterStatus, NodeResourceInfo, ResourceStatus, Vxpu,
};
pub use config::{
    DeployConfig, DriverKind, HubConfig, RemoteConfig, SchedulerConfig, ServerConfig,
    WorkflowConfig,
};
pub use hardware::{Accelerator, HardWare, HardwareError, Processor, XpuKind};
pub use logs::{LogCollector, LogEntry, LogStage, MemoryLogCollector};
pub use types::*;
