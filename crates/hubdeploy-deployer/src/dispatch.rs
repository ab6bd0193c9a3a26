//! Hands freshly written tasks to whichever driver runs them.

use std::sync::Arc;

use async_trait::async_trait;
use hubdeploy_scheduler::FifoScheduler;
use hubdeploy_state::DeployTask;
use hubdeploy_workflow::WorkflowEngine;
use tracing::{error, info};

use crate::error::DeployerResult;

#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Start driving a deploy's tasks. `build` is `None` when only a run
    /// task was created.
    async fn dispatch(&self, build: Option<&DeployTask>, run: &DeployTask) -> DeployerResult<()>;
}

/// Nudges the FIFO scheduler. The scheduler finds the tasks by scanning
/// the store, so the nudge only shortens the wait.
pub struct FifoDispatcher {
    scheduler: Arc<FifoScheduler>,
}

impl FifoDispatcher {
    pub fn new(scheduler: Arc<FifoScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl TaskDispatcher for FifoDispatcher {
    async fn dispatch(&self, build: Option<&DeployTask>, run: &DeployTask) -> DeployerResult<()> {
        let first = build.unwrap_or(run).id;
        let scheduler = self.scheduler.clone();
        // Queueing blocks while the channel is full.
        tokio::spawn(async move {
            if let Err(e) = scheduler.queue(first).await {
                error!(task_id = first, error = %e, "failed to queue task");
            }
        });
        Ok(())
    }
}

/// Starts a deploy workflow, replacing any running one for the same deploy.
pub struct WorkflowDispatcher {
    engine: Arc<WorkflowEngine>,
}

impl WorkflowDispatcher {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl TaskDispatcher for WorkflowDispatcher {
    async fn dispatch(&self, build: Option<&DeployTask>, run: &DeployTask) -> DeployerResult<()> {
        let id = self
            .engine
            .start_with_cancel_old(build.map(|t| t.id), run.id)
            .await?;
        info!(workflow_id = %id, deploy_id = run.deploy_id, "deploy workflow dispatched");
        Ok(())
    }
}
