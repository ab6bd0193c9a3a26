//! Build and run task lifecycle.
//!
//! A single transition table shared by the FIFO runners and the workflow
//! activities. Each event moves one task and its parent deploy together;
//! the store persists both records in one write transaction.
//!
//! ```text
//! build: Pending ─► InQueue ─► InProgress ─► Succeed | Failed
//!          └──────────┴───────────┴────────► Cancelled
//! run:   Pending ─► Deploying ─► StartUp ─► Running
//!                      └──────────┴───────► Failed | RunTimeError | Cancelled
//! ```

use crate::error::{StateError, StateResult};
use crate::types::*;

/// Something that happened to a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// Build accepted by the builder, waiting for a worker.
    BuildQueued,
    BuildStarted,
    BuildSucceeded { image_id: String },
    BuildFailed { reason: String },
    BuildTimedOut,
    /// Run request accepted; the runner named the service.
    RunSubmitted { svc_name: String },
    RunStartingUp,
    RunRunning { endpoint: String },
    RunFailed { reason: String },
    RunRuntimeError { reason: String },
    /// A newer deploy of the same target took over the service.
    Superseded,
    /// The target repository no longer exists.
    RepoNotFound,
    Cancelled { reason: String },
}

impl TaskEvent {
    fn name(&self) -> &'static str {
        match self {
            TaskEvent::BuildQueued => "build_queued",
            TaskEvent::BuildStarted => "build_started",
            TaskEvent::BuildSucceeded { .. } => "build_succeeded",
            TaskEvent::BuildFailed { .. } => "build_failed",
            TaskEvent::BuildTimedOut => "build_timed_out",
            TaskEvent::RunSubmitted { .. } => "run_submitted",
            TaskEvent::RunStartingUp => "run_starting_up",
            TaskEvent::RunRunning { .. } => "run_running",
            TaskEvent::RunFailed { .. } => "run_failed",
            TaskEvent::RunRuntimeError { .. } => "run_runtime_error",
            TaskEvent::Superseded => "superseded",
            TaskEvent::RepoNotFound => "repo_not_found",
            TaskEvent::Cancelled { .. } => "cancelled",
        }
    }
}

/// Outcome of a transition, before it is applied to records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub task_phase: TaskPhase,
    pub deploy_status: DeployStatus,
    pub message: String,
}

/// Compute the next task phase and deploy status for `event`.
pub fn transition(current: TaskPhase, event: &TaskEvent) -> StateResult<Transition> {
    use crate::types::BuildTaskStatus as B;
    use crate::types::RunTaskStatus as R;

    if current.is_terminal() {
        return Err(invalid(current, event));
    }

    match (current, event) {
        (TaskPhase::Build(B::Pending), TaskEvent::BuildQueued) => next(
            TaskPhase::Build(B::InQueue),
            DeployStatus::BuildInQueue,
            "build in queue",
        ),
        (
            TaskPhase::Build(B::Pending | B::InQueue | B::InProgress),
            TaskEvent::BuildStarted,
        ) => next(
            TaskPhase::Build(B::InProgress),
            DeployStatus::Building,
            "build in progress",
        ),
        (TaskPhase::Build(_), TaskEvent::BuildSucceeded { .. }) => next(
            TaskPhase::Build(B::Succeed),
            DeployStatus::BuildSuccess,
            "build succeeded",
        ),
        (TaskPhase::Build(_), TaskEvent::BuildFailed { reason }) => next(
            TaskPhase::Build(B::Failed),
            DeployStatus::BuildFailed,
            reason,
        ),
        (TaskPhase::Build(_), TaskEvent::BuildTimedOut) => next(
            TaskPhase::Build(B::Failed),
            DeployStatus::BuildFailed,
            "build task timeout",
        ),
        (TaskPhase::Run(R::Pending), TaskEvent::RunSubmitted { .. }) => next(
            TaskPhase::Run(R::Deploying),
            DeployStatus::Deploying,
            "deploying",
        ),
        (TaskPhase::Run(R::Deploying | R::StartUp), TaskEvent::RunStartingUp) => next(
            TaskPhase::Run(R::StartUp),
            DeployStatus::Startup,
            "starting up",
        ),
        (TaskPhase::Run(R::Deploying | R::StartUp), TaskEvent::RunRunning { .. }) => next(
            TaskPhase::Run(R::Running),
            DeployStatus::Running,
            "running",
        ),
        (TaskPhase::Run(_), TaskEvent::RunFailed { reason }) => next(
            TaskPhase::Run(R::Failed),
            DeployStatus::DeployFailed,
            reason,
        ),
        (TaskPhase::Run(R::Deploying | R::StartUp), TaskEvent::RunRuntimeError { reason }) => {
            next(
                TaskPhase::Run(R::RunTimeError),
                DeployStatus::RunTimeError,
                reason,
            )
        }
        (TaskPhase::Run(_), TaskEvent::Superseded) => next(
            TaskPhase::Run(R::Cancelled),
            DeployStatus::Stopped,
            "cancelled by a newer deploy",
        ),
        (phase, TaskEvent::RepoNotFound) => next(
            phase.cancelled(),
            phase.failed_deploy_status(),
            "repo not found",
        ),
        (phase, TaskEvent::Cancelled { reason }) => {
            next(phase.cancelled(), DeployStatus::Stopped, reason)
        }
        _ => Err(invalid(current, event)),
    }
}

/// Apply `event` to a task and its deploy in place.
pub fn apply(deploy: &mut Deploy, task: &mut DeployTask, event: &TaskEvent) -> StateResult<()> {
    let t = transition(task.phase, event)?;
    task.phase = t.task_phase;
    task.message = t.message.clone();
    deploy.status = t.deploy_status;
    deploy.message = t.message;

    match event {
        TaskEvent::BuildSucceeded { image_id } => deploy.image_id = image_id.clone(),
        TaskEvent::RunSubmitted { svc_name } if !svc_name.is_empty() => {
            deploy.svc_name = svc_name.clone()
        }
        TaskEvent::RunRunning { endpoint } => deploy.endpoint = endpoint.clone(),
        _ => {}
    }
    Ok(())
}

fn next(task_phase: TaskPhase, deploy_status: DeployStatus, message: &str) -> StateResult<Transition> {
    Ok(Transition {
        task_phase,
        deploy_status,
        message: message.to_string(),
    })
}

fn invalid(current: TaskPhase, event: &TaskEvent) -> StateError {
    StateError::InvalidTransition(format!(
        "{} not allowed from {:?}",
        event.name(),
        current
    ))
}
