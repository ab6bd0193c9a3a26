//! hubdeploy-workflow — activity-based driver for deploy tasks.
//!
//! The alternative to the FIFO scheduler. A deploy workflow runs two
//! activities in sequence:
//!
//! - **build**: submits the image build, then waits for the builder's
//!   callbacks to move the task to a final phase
//! - **deploy**: submits the service and polls the runner until it runs
//!
//! Both tick a heartbeat next to their status check, honour a per-attempt
//! deadline, and stop the remote job when cancelled. Failed attempts are
//! retried with exponential backoff unless the failure is final.

pub mod activities;
pub mod context;
pub mod engine;
pub mod error;
pub mod retry;
pub mod webhook;

#[cfg(test)]
mod testutil;

pub use activities::{ActivitySettings, DeployActivities};
pub use context::ActivityContext;
pub use engine::{WorkflowEngine, workflow_id};
pub use error::{WorkflowError, WorkflowResult};
pub use retry::RetryPolicy;
pub use webhook::{BuildCallback, BuildPhase, apply_build_callback};
