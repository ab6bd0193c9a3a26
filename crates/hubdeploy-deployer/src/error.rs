use hubdeploy_state::DeployId;
use thiserror::Error;

pub type DeployerResult<T> = Result<T, DeployerError>;

#[derive(Debug, Error)]
pub enum DeployerError {
    #[error("deploy {0} not found")]
    DeployNotFound(DeployId),

    #[error("cluster {0} not found")]
    ClusterNotFound(String),

    #[error("no cluster registered")]
    NoCluster,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("order detail id {0} not found")]
    OrderDetailNotFound(u64),

    #[error("order detail id {0} is already used")]
    OrderDetailInUse(u64),

    #[error("cluster {0} is unavailable")]
    ClusterUnavailable(String),

    #[error("required resource on cluster {0} is not enough")]
    NotEnoughResource(String),

    #[error("deploy {0} is running, stop it first")]
    DeployRunning(DeployId),

    #[error("failed to check service of deploy {0}")]
    ServiceCheckFailed(DeployId),

    #[error("remote error: {0}")]
    Remote(#[from] hubdeploy_remote::RemoteError),

    #[error("state store error: {0}")]
    State(#[from] hubdeploy_state::StateError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] hubdeploy_scheduler::SchedulerError),

    #[error("workflow error: {0}")]
    Workflow(#[from] hubdeploy_workflow::WorkflowError),
}
