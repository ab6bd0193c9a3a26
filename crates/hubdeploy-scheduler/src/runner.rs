//! The unit of work the FIFO scheduler executes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hubdeploy_core::{DeployConfig, LogCollector, LogEntry, LogStage};
use hubdeploy_remote::{ImageBuilder, ImageRunner};
use hubdeploy_state::{Deploy, DeployTask, StateStore, TaskEvent, TaskId};
use tracing::error;

use crate::error::{SchedulerError, SchedulerResult};
use crate::settings::RunnerSettings;

/// Drives one task to completion.
///
/// A runner that returns an error has its task failed and every later task
/// of the same deploy cancelled by the scheduler.
#[async_trait]
pub trait Runner: Send {
    /// Task this runner drives; 0 for sleep tasks.
    fn watch_id(&self) -> TaskId;

    async fn run(&mut self) -> SchedulerResult<()>;

    /// Called after the scheduler gave up on [`run`](Self::run). Releases
    /// whatever the runner already started remotely.
    async fn abort(&mut self) {}
}

/// Placeholder queued when nothing is schedulable. Keeps the pump turning
/// without busy-looping.
pub struct SleepTask {
    pub duration: Duration,
}

#[async_trait]
impl Runner for SleepTask {
    fn watch_id(&self) -> TaskId {
        0
    }

    async fn run(&mut self) -> SchedulerResult<()> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Dependencies shared by every runner.
pub struct RunnerContext {
    pub store: StateStore,
    pub builder: Arc<dyn ImageBuilder>,
    pub runner: Arc<dyn ImageRunner>,
    pub logs: Arc<dyn LogCollector>,
    pub settings: RunnerSettings,
    pub deploy: DeployConfig,
}

impl RunnerContext {
    pub fn reload_task(&self, task_id: TaskId) -> SchedulerResult<DeployTask> {
        self.store
            .get_deploy_task(task_id)?
            .ok_or(SchedulerError::TaskNotFound(task_id))
    }

    pub fn reload_deploy(&self, deploy_id: u64) -> SchedulerResult<Deploy> {
        self.store
            .get_deploy(deploy_id)?
            .ok_or(SchedulerError::DeployNotFound(deploy_id))
    }

    /// Persist a lifecycle event and report it to the deploy log.
    pub fn transition(
        &self,
        task_id: TaskId,
        event: &TaskEvent,
        step: &str,
    ) -> SchedulerResult<(Deploy, DeployTask)> {
        let (deploy, task) = self.store.apply_transition(task_id, event)?;
        let stage = if task.phase.is_build() {
            LogStage::Build
        } else {
            LogStage::Deploy
        };
        self.logs
            .report(LogEntry::new(deploy.id, task.id, stage, step, task.message.clone()));
        Ok((deploy, task))
    }

    /// Like [`transition`](Self::transition) but only logs failures. Used on
    /// paths that are already returning an error.
    pub fn record(&self, task_id: TaskId, event: &TaskEvent, step: &str) {
        if let Err(e) = self.transition(task_id, event, step) {
            error!(task_id, error = %e, step, "failed to persist task status");
        }
    }
}
