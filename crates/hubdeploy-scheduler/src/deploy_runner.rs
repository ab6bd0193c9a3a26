//! Image run task runner.

use std::sync::Arc;

use async_trait::async_trait;
use hubdeploy_core::epoch_secs;
use hubdeploy_remote::RunStatusCode;
use hubdeploy_state::{Deploy, DeployTask, RunTaskStatus, TaskEvent, TaskId, TaskPhase};
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::repo::RepoInfo;
use crate::request::{run_request, service_request};
use crate::runner::{Runner, RunnerContext};

const DEPLOY_TIMEOUT_REASON: &str = "deploy timeout";

/// State of the build task that precedes a run task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildGate {
    /// Build finished successfully, was skipped, or there is no build task.
    Open,
    /// Build still pending or in progress.
    Waiting,
    /// Build failed or was cancelled.
    Closed,
}

/// Inspect the latest build task created before `task` for the same deploy.
pub fn build_gate(siblings: &[DeployTask], task: &DeployTask) -> BuildGate {
    let build = siblings
        .iter()
        .filter(|t| t.phase.is_build() && t.id < task.id)
        .max_by_key(|t| t.id);
    match build.map(|t| t.phase) {
        None => BuildGate::Open,
        Some(TaskPhase::Build(status)) if status.is_success() => BuildGate::Open,
        Some(phase) if phase.is_terminal() => BuildGate::Closed,
        Some(_) => BuildGate::Waiting,
    }
}

/// Submits a service to the image runner and polls it until it runs.
pub struct DeployRunner {
    ctx: Arc<RunnerContext>,
    repo: RepoInfo,
    task: DeployTask,
}

impl DeployRunner {
    pub fn new(ctx: Arc<RunnerContext>, repo: RepoInfo, task: DeployTask) -> Self {
        Self { ctx, repo, task }
    }

    /// Submit the run once the build allows it. Returns false when the
    /// task was cancelled instead.
    async fn submit(&mut self) -> SchedulerResult<bool> {
        loop {
            let siblings = self.ctx.store.get_deploy_tasks_of_deploy(self.task.deploy_id)?;
            match build_gate(&siblings, &self.task) {
                BuildGate::Open => {}
                BuildGate::Waiting => {
                    debug!(task_id = self.task.id, "waiting for build to finish");
                    tokio::time::sleep(self.ctx.settings.image_wait).await;
                    continue;
                }
                BuildGate::Closed => {
                    self.cancel_after_failed_build()?;
                    return Ok(false);
                }
            }

            let deploy = self.ctx.reload_deploy(self.task.deploy_id)?;
            if deploy.image_id.is_empty() {
                debug!(task_id = self.task.id, "image not ready yet");
                tokio::time::sleep(self.ctx.settings.image_wait).await;
                continue;
            }

            let framework = if deploy.runtime_framework.is_empty() {
                None
            } else {
                self.ctx
                    .store
                    .find_enabled_runtime_framework(&deploy.runtime_framework)?
            };
            let req = run_request(&self.ctx.deploy, &self.repo, &deploy, &self.task, framework.as_ref())?;
            debug!(task_id = self.task.id, svc_name = %req.svc_name, image_id = %req.image_id, "submit run request");

            let svc_name = match self.ctx.runner.run(&req).await {
                Ok(name) => name,
                Err(e) => {
                    let reason = format!("call image runner failed: {e}");
                    self.ctx.record(self.task.id, &TaskEvent::RunFailed { reason: reason.clone() }, "deploy_failed");
                    return Err(SchedulerError::DeployFailed(reason));
                }
            };

            match self.ctx.transition(self.task.id, &TaskEvent::RunSubmitted { svc_name }, "deploying") {
                Ok((_, task)) => {
                    self.task = task;
                    return Ok(true);
                }
                Err(e) => {
                    // The reservation could not be bound; take the service down again.
                    if let Err(stop_err) = self.ctx.runner.stop(&service_request(&self.repo, &deploy)).await {
                        warn!(task_id = self.task.id, error = %stop_err, "failed to stop unbound service");
                    }
                    return Err(e);
                }
            }
        }
    }

    fn cancel_after_failed_build(&mut self) -> SchedulerResult<()> {
        let mut task = self.ctx.reload_task(self.task.id)?;
        task.phase = task.phase.cancelled();
        task.message = "cancel as build did not succeed".to_string();
        task.updated_at = epoch_secs();
        self.task = self.ctx.store.update_deploy_task(&task)?;
        info!(task_id = self.task.id, "run task cancelled after failed build");
        Ok(())
    }

    fn timed_out(&self, deploy: &Deploy) -> bool {
        let limit = self.ctx.settings.deploy_timeout(deploy.deploy_type.is_space());
        let elapsed = epoch_secs().saturating_sub(self.task.deploy_started_at());
        elapsed >= limit.as_secs()
    }

    async fn force_cancel(&mut self, deploy: &Deploy) -> SchedulerResult<()> {
        warn!(
            task_id = self.task.id,
            deploy_id = deploy.id,
            svc_name = %deploy.svc_name,
            "deploy timed out, stopping service"
        );
        self.ctx.runner.stop(&service_request(&self.repo, deploy)).await?;
        let event = TaskEvent::RunFailed {
            reason: DEPLOY_TIMEOUT_REASON.to_string(),
        };
        self.ctx.transition(self.task.id, &event, "deploy_failed")?;
        Ok(())
    }
}

#[async_trait]
impl Runner for DeployRunner {
    fn watch_id(&self) -> TaskId {
        self.task.id
    }

    async fn abort(&mut self) {
        let submitted = match self.ctx.reload_task(self.task.id) {
            Ok(task) => matches!(
                task.phase,
                TaskPhase::Run(RunTaskStatus::Deploying | RunTaskStatus::StartUp)
            ),
            Err(e) => {
                error!(task_id = self.task.id, error = %e, "failed to reload aborted task");
                return;
            }
        };
        if !submitted {
            return;
        }
        let deploy = match self.ctx.reload_deploy(self.task.deploy_id) {
            Ok(deploy) => deploy,
            Err(e) => {
                error!(task_id = self.task.id, error = %e, "failed to reload deploy of aborted task");
                return;
            }
        };
        warn!(task_id = self.task.id, svc_name = %deploy.svc_name, "stopping service of aborted task");
        if let Err(e) = self.ctx.runner.stop(&service_request(&self.repo, &deploy)).await {
            warn!(task_id = self.task.id, error = %e, "failed to stop service of aborted task");
        }
    }

    async fn run(&mut self) -> SchedulerResult<()> {
        info!(task_id = self.task.id, deploy_id = self.task.deploy_id, "run image deploy task");
        self.task = self.ctx.reload_task(self.task.id)?;

        if self.task.phase == TaskPhase::Run(RunTaskStatus::Pending) && !self.submit().await? {
            return Ok(());
        }

        let poll = self.ctx.settings.deploy_poll;
        loop {
            tokio::time::sleep(poll).await;

            let deploy = self.ctx.reload_deploy(self.task.deploy_id)?;
            let resp = match self.ctx.runner.status(&service_request(&self.repo, &deploy)).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(task_id = self.task.id, error = %e, "failed to call runner status api");
                    continue;
                }
            };

            if resp.deploy_id > self.task.deploy_id {
                info!(task_id = self.task.id, newer = resp.deploy_id, "cancelled by a newer deploy");
                self.ctx.transition(self.task.id, &TaskEvent::Superseded, "deploy_cancelled")?;
                return Ok(());
            }

            match resp.status() {
                Some(RunStatusCode::Pending | RunStatusCode::Deploying) => {
                    if self.timed_out(&deploy) {
                        return self.force_cancel(&deploy).await;
                    }
                }
                Some(RunStatusCode::Startup) => {
                    if self.task.phase == TaskPhase::Run(RunTaskStatus::Deploying) {
                        let (_, task) =
                            self.ctx.transition(self.task.id, &TaskEvent::RunStartingUp, "deploy_startup")?;
                        self.task = task;
                    }
                }
                Some(RunStatusCode::Running) => {
                    info!(task_id = self.task.id, endpoint = %resp.endpoint, "image running");
                    let event = TaskEvent::RunRunning {
                        endpoint: resp.endpoint,
                    };
                    self.ctx.transition(self.task.id, &event, "deploy_running")?;
                    return Ok(());
                }
                Some(RunStatusCode::DeployFailed) => {
                    error!(task_id = self.task.id, message = %resp.message, "image deploy failed");
                    let event = TaskEvent::RunFailed {
                        reason: resp.message.clone(),
                    };
                    self.ctx.record(self.task.id, &event, "deploy_failed");
                    return Err(SchedulerError::DeployFailed(resp.message));
                }
                Some(RunStatusCode::RunTimeError) => {
                    error!(task_id = self.task.id, message = %resp.message, "image runtime error");
                    let event = TaskEvent::RunRuntimeError {
                        reason: resp.message.clone(),
                    };
                    self.ctx.record(self.task.id, &event, "deploy_runtime_error");
                    return Err(SchedulerError::RuntimeError(resp.message));
                }
                Some(RunStatusCode::Sleeping | RunStatusCode::Stopped) | None => {
                    error!(task_id = self.task.id, code = resp.code, "unknown image status");
                    return Err(SchedulerError::UnknownStatus {
                        stage: "deploy",
                        code: resp.code,
                    });
                }
            }
        }
    }
}
