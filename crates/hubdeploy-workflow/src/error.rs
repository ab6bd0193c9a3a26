//! Workflow error types.

use hubdeploy_scheduler::SchedulerError;
use hubdeploy_state::TaskId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("repo not found for deploy {0}")]
    RepoNotFound(u64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("task {task_id} already finished: {message}")]
    TaskTerminal { task_id: TaskId, message: String },

    #[error("image of deploy {0} is not ready")]
    ImageNotReady(u64),

    #[error("build task failed: {0}")]
    BuildFailed(String),

    #[error("deploy failed: {0}")]
    DeployFailed(String),

    #[error("runtime error: {0}")]
    RuntimeError(String),

    #[error("unknown {stage} status code {code}")]
    UnknownStatus { stage: &'static str, code: i32 },

    #[error("task {0} timed out")]
    TimedOut(TaskId),

    #[error("activity for task {0} exceeded its deadline")]
    DeadlineExceeded(TaskId),

    #[error("task {0} cancelled")]
    Cancelled(TaskId),

    #[error("workflow {0} panicked or was aborted")]
    Aborted(String),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("state store error: {0}")]
    State(#[from] hubdeploy_state::StateError),

    #[error("remote error: {0}")]
    Remote(#[from] hubdeploy_remote::RemoteError),
}

impl WorkflowError {
    /// Whether another attempt of the same activity can succeed.
    ///
    /// Failures that already left the task in a terminal state are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkflowError::ImageNotReady(_)
            | WorkflowError::State(_)
            | WorkflowError::Remote(_) => true,
            WorkflowError::Scheduler(e) => matches!(
                e,
                SchedulerError::State(_) | SchedulerError::Remote(_) | SchedulerError::DeployNotFound(_)
            ),
            _ => false,
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_errors_are_not_retried() {
        assert!(!WorkflowError::RepoNotFound(1).is_retryable());
        assert!(!WorkflowError::InvalidInput("x".into()).is_retryable());
        assert!(
            !WorkflowError::TaskTerminal {
                task_id: 1,
                message: "done".into()
            }
            .is_retryable()
        );
        assert!(!WorkflowError::Cancelled(1).is_retryable());
        assert!(!WorkflowError::Scheduler(SchedulerError::InvalidRequest("x".into())).is_retryable());
    }

    #[test]
    fn transient_errors_are_retried() {
        assert!(WorkflowError::ImageNotReady(1).is_retryable());
        assert!(WorkflowError::State(hubdeploy_state::StateError::NotFound("deploy 1".into())).is_retryable());
    }
}
