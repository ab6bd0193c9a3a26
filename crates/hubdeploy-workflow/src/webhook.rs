//! Build status callbacks pushed by the image builder.
//!
//! On the workflow path the builder reports progress through these
//! callbacks instead of being polled. The build activity picks the result
//! up by re-reading its task.

use hubdeploy_scheduler::RunnerContext;
use hubdeploy_state::{Deploy, DeployTask, TaskEvent};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{WorkflowError, WorkflowResult};

/// Phase names reported by the build engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildCallback {
    pub deploy_id: u64,
    pub task_id: u64,
    pub phase: BuildPhase,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub image_id: String,
}

impl BuildCallback {
    pub fn event(&self) -> TaskEvent {
        match self.phase {
            BuildPhase::Pending | BuildPhase::Running => TaskEvent::BuildStarted,
            BuildPhase::Succeeded => TaskEvent::BuildSucceeded {
                image_id: self.image_id.clone(),
            },
            BuildPhase::Failed | BuildPhase::Error => TaskEvent::BuildFailed {
                reason: if self.message.is_empty() {
                    "build failed".to_string()
                } else {
                    self.message.clone()
                },
            },
        }
    }
}

/// Apply a builder callback to its task and deploy.
pub fn apply_build_callback(
    ctx: &RunnerContext,
    callback: &BuildCallback,
) -> WorkflowResult<(Deploy, DeployTask)> {
    let task = ctx.reload_task(callback.task_id)?;
    if task.deploy_id != callback.deploy_id {
        return Err(WorkflowError::InvalidInput(format!(
            "task {} does not belong to deploy {}",
            callback.task_id, callback.deploy_id
        )));
    }
    if !task.phase.is_build() {
        return Err(WorkflowError::InvalidInput(format!(
            "task {} is not a build task",
            callback.task_id
        )));
    }
    if callback.phase == BuildPhase::Succeeded && callback.image_id.is_empty() {
        return Err(WorkflowError::InvalidInput(
            "succeeded build callback without image id".to_string(),
        ));
    }
    if task.phase.is_terminal() {
        return Err(WorkflowError::TaskTerminal {
            task_id: task.id,
            message: task.message,
        });
    }

    let step = match callback.phase {
        BuildPhase::Pending | BuildPhase::Running => "build_in_progress",
        BuildPhase::Succeeded => "build_succeeded",
        BuildPhase::Failed | BuildPhase::Error => "build_failed",
    };
    info!(
        task_id = task.id,
        deploy_id = task.deploy_id,
        phase = ?callback.phase,
        "build callback received"
    );
    Ok(ctx.transition(task.id, &callback.event(), step)?)
}
