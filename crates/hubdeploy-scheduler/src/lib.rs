//! hubdeploy-scheduler — FIFO scheduling of deploy tasks.
//!
//! Deploy tasks are rows in the state store, drained strictly in creation
//! order by [`FifoScheduler`]. Each task is driven by a runner:
//!
//! - **`BuilderRunner`**: submits an image build and polls the builder
//! - **`DeployRunner`**: waits for the image, submits the service to the
//!   runner and polls it until it runs, fails, or times out
//! - **`SleepTask`**: idles the pump when nothing is schedulable
//!
//! A runner error fails its task and cancels the later tasks of the same
//! deploy in one store transaction.

pub mod builder_runner;
pub mod deploy_runner;
pub mod error;
pub mod fifo;
pub mod repo;
pub mod request;
pub mod runner;
pub mod settings;

#[cfg(test)]
mod testutil;

pub use builder_runner::BuilderRunner;
pub use deploy_runner::{BuildGate, DeployRunner, build_gate};
pub use error::{SchedulerError, SchedulerResult};
pub use fifo::{FifoScheduler, Queued};
pub use repo::{RepoInfo, resolve_repo, split_path};
pub use request::{
    DEPLOY_ID_ANNOTATION, build_request, build_status_request, build_stop_request, deploy_env,
    engine_args, json_map, run_request, service_request,
};
pub use runner::{Runner, RunnerContext, SleepTask};
pub use settings::RunnerSettings;
