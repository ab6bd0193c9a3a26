//! hubdeploy-deployer — the entry point for deploy requests.
//!
//! [`Deployer`] writes deploy rows and their task pairs, hands the tasks
//! to a [`TaskDispatcher`] (the FIFO scheduler or the workflow engine),
//! and answers status, log, replica and cluster queries.
//!
//! - **`ledger`**: order-detail reservations
//! - **`naming`**: unique service names
//! - **`cluster`**: cluster views and placement checks

pub mod cluster;
pub mod deployer;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod logs;
pub mod naming;

#[cfg(test)]
mod testutil;

pub use cluster::check_resource;
pub use deployer::{DeployRequest, DeployStatusReport, DeployUpdate, Deployer, ReplicaReport};
pub use dispatch::{FifoDispatcher, TaskDispatcher, WorkflowDispatcher};
pub use error::{DeployerError, DeployerResult};
pub use ledger::Ledger;
pub use logs::{MultiLogReader, parse_since_time};
pub use naming::SvcNameGenerator;
