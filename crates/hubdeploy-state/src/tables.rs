//! redb table definitions for the hub deploy state store.
//!
//! Deploys and tasks use `u64` keys so creation order is key order; the
//! FIFO cursor is a range scan over `DEPLOY_TASKS`.

use redb::TableDefinition;

/// Deploy rows keyed by deploy id.
pub const DEPLOYS: TableDefinition<u64, &[u8]> = TableDefinition::new("deploys");

/// Deploy tasks keyed by task id.
pub const DEPLOY_TASKS: TableDefinition<u64, &[u8]> = TableDefinition::new("deploy_tasks");

/// Reservations keyed by order detail id.
pub const USER_RESOURCES: TableDefinition<u64, &[u8]> = TableDefinition::new("user_resources");

/// Cluster metadata keyed by cluster id.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Spaces keyed by space id.
pub const SPACES: TableDefinition<u64, &[u8]> = TableDefinition::new("spaces");

/// Models keyed by model id.
pub const MODELS: TableDefinition<u64, &[u8]> = TableDefinition::new("models");

/// Runtime frameworks keyed by name.
pub const RUNTIME_FRAMEWORKS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("runtime_frameworks");

/// Id sequences keyed by sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub const DEPLOY_SEQ: &str = "deploy";
pub const TASK_SEQ: &str = "deploy_task";
