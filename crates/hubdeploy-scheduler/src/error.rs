//! Scheduler error types.

use hubdeploy_state::TaskId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("deploy not found: {0}")]
    DeployNotFound(u64),

    #[error("deploy task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("repo not found for deploy {0}")]
    RepoNotFound(u64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("deploy failed: {0}")]
    DeployFailed(String),

    #[error("runtime error: {0}")]
    RuntimeError(String),

    #[error("unknown {stage} status code {code}")]
    UnknownStatus { stage: &'static str, code: i32 },

    #[error("task {0} timed out")]
    Timeout(TaskId),

    #[error("scheduler queue closed")]
    QueueClosed,

    #[error("state store error: {0}")]
    State(#[from] hubdeploy_state::StateError),

    #[error("remote error: {0}")]
    Remote(#[from] hubdeploy_remote::RemoteError),
}

impl SchedulerError {
    /// Message to store on a failed deploy. Remote failures keep the
    /// remote's own wording.
    pub fn reason(&self) -> String {
        match self {
            SchedulerError::BuildFailed(msg)
            | SchedulerError::DeployFailed(msg)
            | SchedulerError::RuntimeError(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_failures_keep_their_message() {
        assert_eq!(SchedulerError::DeployFailed("image pull backoff".into()).reason(), "image pull backoff");
        assert_eq!(SchedulerError::RuntimeError("oom killed".into()).reason(), "oom killed");
        assert_eq!(SchedulerError::BuildFailed("no quota".into()).reason(), "no quota");
        assert_eq!(SchedulerError::Timeout(4).reason(), "task 4 timed out");
    }
}
