//! Build and deploy activities.
//!
//! Same lifecycle as the FIFO runners, driven differently: each activity
//! ticks a heartbeat and a status check side by side and watches its
//! context for cancellation. A cancelled activity stops the remote job
//! best-effort and marks its task cancelled.

use std::sync::Arc;
use std::time::Duration;

use hubdeploy_core::{HubConfig, epoch_secs};
use hubdeploy_remote::{RemoteError, RunStatusCode};
use hubdeploy_scheduler::{
    BuildGate, RepoInfo, RunnerContext, build_gate, build_request, build_stop_request, resolve_repo,
    run_request, service_request,
};
use hubdeploy_state::{
    BuildTaskStatus, Deploy, DeployTask, RunTaskStatus, TaskEvent, TaskId, TaskPhase,
};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::context::ActivityContext;
use crate::error::{WorkflowError, WorkflowResult};

const CANCELLED_MESSAGE: &str = "Cancelled";
const DEPLOY_TIMEOUT_REASON: &str = "deploy timeout";

#[derive(Debug, Clone, PartialEq)]
pub struct ActivitySettings {
    pub heartbeat: Duration,
    pub status_check: Duration,
    /// Build tasks older than this fail on the next status check.
    pub build_timeout: Duration,
    /// Start-to-close bound of one attempt.
    pub activity_timeout: Duration,
}

impl ActivitySettings {
    pub fn from_config(config: &HubConfig) -> Self {
        Self {
            heartbeat: config.workflow.heartbeat(),
            status_check: config.workflow.status_check(),
            build_timeout: config.deploy.build_timeout(),
            activity_timeout: config.workflow.activity_timeout(),
        }
    }
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self::from_config(&HubConfig::default())
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Outcome of one status check.
enum Check {
    Continue,
    Done,
}

pub struct DeployActivities {
    ctx: Arc<RunnerContext>,
    settings: ActivitySettings,
}

impl DeployActivities {
    pub fn new(ctx: Arc<RunnerContext>, settings: ActivitySettings) -> Self {
        Self { ctx, settings }
    }

    pub fn context(&self) -> &Arc<RunnerContext> {
        &self.ctx
    }

    pub fn settings(&self) -> &ActivitySettings {
        &self.settings
    }

    /// Load the task and the repo behind it. A missing repo cancels the
    /// task and is final.
    fn prepare(&self, task_id: TaskId) -> WorkflowResult<(DeployTask, Deploy, RepoInfo)> {
        let task = self.ctx.reload_task(task_id)?;
        let deploy = self.ctx.reload_deploy(task.deploy_id)?;
        match resolve_repo(&self.ctx.store, &deploy)? {
            Some(repo) => Ok((task, deploy, repo)),
            None => {
                warn!(task_id, deploy_id = deploy.id, "repo not found, cancelling task");
                if !task.phase.is_terminal() {
                    self.ctx.transition(task_id, &TaskEvent::RepoNotFound, "repo_not_found")?;
                }
                Err(WorkflowError::RepoNotFound(deploy.id))
            }
        }
    }

    /// Mark the task cancelled without touching the deploy status, which
    /// belongs to whatever replaced this attempt or to the failed build.
    fn mark_cancelled(&self, task_id: TaskId, message: &str) {
        let result = self.ctx.reload_task(task_id).and_then(|mut task| {
            if task.phase.is_terminal() {
                return Ok(task);
            }
            task.phase = task.phase.cancelled();
            task.message = message.to_string();
            task.updated_at = epoch_secs();
            Ok(self.ctx.store.update_deploy_task(&task)?)
        });
        if let Err(e) = result {
            error!(task_id, error = %e, "failed to mark task cancelled");
        }
    }

    // ── Build ──────────────────────────────────────────────────────

    /// Drive a build task until the builder reports a final phase.
    pub async fn build(&self, actx: &ActivityContext, task_id: TaskId) -> WorkflowResult<()> {
        let task = self.ctx.reload_task(task_id)?;
        match task.phase {
            TaskPhase::Build(status) if status.is_success() => return Ok(()),
            TaskPhase::Build(_) if task.phase.is_terminal() => {
                return Err(WorkflowError::TaskTerminal {
                    task_id,
                    message: task.message,
                });
            }
            TaskPhase::Build(_) => {}
            TaskPhase::Run(_) => {
                return Err(WorkflowError::InvalidInput(format!("task {task_id} is not a build task")));
            }
        }
        let (_, _, repo) = self.prepare(task_id)?;
        info!(task_id, repo = %repo.path, "build activity started");

        if let Check::Done = self.check_build(task_id, &repo).await? {
            return Ok(());
        }

        let mut heartbeat = ticker(self.settings.heartbeat);
        let mut status = ticker(self.settings.status_check);
        status.reset();
        loop {
            tokio::select! {
                _ = actx.cancelled() => {
                    info!(task_id, "build activity cancelled");
                    self.stop_build_detached(task_id, repo.clone());
                    self.mark_cancelled(task_id, CANCELLED_MESSAGE);
                    return Err(WorkflowError::Cancelled(task_id));
                }
                _ = heartbeat.tick() => {
                    actx.heartbeat(task_id);
                    if actx.deadline_exceeded() {
                        let reason = "build task failed: build activity cancelled: deadline exceeded".to_string();
                        self.ctx.record(task_id, &TaskEvent::BuildFailed { reason }, "build_failed");
                        return Err(WorkflowError::DeadlineExceeded(task_id));
                    }
                }
                _ = status.tick() => {
                    if let Check::Done = self.check_build(task_id, &repo).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn check_build(&self, task_id: TaskId, repo: &RepoInfo) -> WorkflowResult<Check> {
        let task = self.ctx.reload_task(task_id)?;
        match task.phase {
            TaskPhase::Build(BuildTaskStatus::Pending) => {
                let deploy = self.ctx.reload_deploy(task.deploy_id)?;
                let req = build_request(repo, &deploy, &task);
                if let Err(e) = self.ctx.builder.build(&req).await {
                    let reason = format!("build task failed: {e}");
                    self.ctx.record(task_id, &TaskEvent::BuildFailed { reason: reason.clone() }, "build_failed");
                    return Err(WorkflowError::BuildFailed(reason));
                }
                self.ctx.transition(task_id, &TaskEvent::BuildQueued, "build_in_queue")?;
                Ok(Check::Continue)
            }
            TaskPhase::Build(BuildTaskStatus::Failed) => Err(WorkflowError::BuildFailed(task.message)),
            TaskPhase::Build(BuildTaskStatus::Cancelled) => Err(WorkflowError::TaskTerminal {
                task_id,
                message: task.message,
            }),
            TaskPhase::Build(status) if status.is_success() => {
                info!(task_id, "build finished");
                Ok(Check::Done)
            }
            _ if self.build_timed_out(&task) => {
                warn!(task_id, "build task timed out");
                self.ctx.transition(task_id, &TaskEvent::BuildTimedOut, "build_failed")?;
                Err(WorkflowError::TimedOut(task_id))
            }
            _ => {
                debug!(task_id, status = task.phase.status_code(), "build still running");
                Ok(Check::Continue)
            }
        }
    }

    fn build_timed_out(&self, task: &DeployTask) -> bool {
        epoch_secs().saturating_sub(task.created_at) >= self.settings.build_timeout.as_secs()
    }

    fn stop_build_detached(&self, task_id: TaskId, repo: RepoInfo) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let deploy = match ctx.reload_deploy(repo.deploy_id) {
                Ok(deploy) => deploy,
                Err(e) => {
                    error!(task_id, error = %e, "failed to load deploy for build stop");
                    return;
                }
            };
            // The job may already be gone, so failures are only logged.
            if let Err(e) = ctx.builder.stop(&build_stop_request(&repo, &deploy, task_id)).await {
                error!(task_id, error = %e, "failed to stop build");
            }
        });
    }

    // ── Deploy ─────────────────────────────────────────────────────

    /// Submit a run task to the image runner and poll it until it runs.
    pub async fn deploy(&self, actx: &ActivityContext, task_id: TaskId) -> WorkflowResult<()> {
        let task = self.ctx.reload_task(task_id)?;
        match task.phase {
            TaskPhase::Run(RunTaskStatus::Running) => return Ok(()),
            TaskPhase::Run(_) if task.phase.is_terminal() => {
                return Err(WorkflowError::TaskTerminal {
                    task_id,
                    message: task.message,
                });
            }
            TaskPhase::Run(_) => {}
            TaskPhase::Build(_) => {
                return Err(WorkflowError::InvalidInput(format!("task {task_id} is not a run task")));
            }
        }
        let (task, deploy, repo) = self.prepare(task_id)?;
        info!(task_id, deploy_id = deploy.id, repo = %repo.path, "deploy activity started");

        if task.phase == TaskPhase::Run(RunTaskStatus::Pending) {
            self.submit(&task, &deploy, &repo).await?;
        }

        let mut heartbeat = ticker(self.settings.heartbeat);
        let mut status = ticker(self.settings.status_check);
        loop {
            tokio::select! {
                _ = actx.cancelled() => {
                    info!(task_id, "deploy activity cancelled");
                    self.stop_service_detached(task_id, repo.clone());
                    self.mark_cancelled(task_id, CANCELLED_MESSAGE);
                    return Err(WorkflowError::Cancelled(task_id));
                }
                _ = heartbeat.tick() => {
                    actx.heartbeat(task_id);
                    if actx.deadline_exceeded() {
                        let reason = "deploy activity cancelled: deadline exceeded".to_string();
                        self.ctx.record(task_id, &TaskEvent::RunFailed { reason }, "deploy_failed");
                        return Err(WorkflowError::DeadlineExceeded(task_id));
                    }
                }
                _ = status.tick() => {
                    if let Check::Done = self.check_deploy(task_id, &repo).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn submit(&self, task: &DeployTask, deploy: &Deploy, repo: &RepoInfo) -> WorkflowResult<()> {
        let siblings = self.ctx.store.get_deploy_tasks_of_deploy(task.deploy_id)?;
        match build_gate(&siblings, task) {
            BuildGate::Open => {}
            BuildGate::Waiting => return Err(WorkflowError::ImageNotReady(deploy.id)),
            BuildGate::Closed => {
                self.mark_cancelled(task.id, "cancel as build did not succeed");
                return Err(WorkflowError::TaskTerminal {
                    task_id: task.id,
                    message: "build did not succeed".to_string(),
                });
            }
        }
        if deploy.image_id.is_empty() {
            return Err(WorkflowError::ImageNotReady(deploy.id));
        }

        let framework = if deploy.runtime_framework.is_empty() {
            None
        } else {
            self.ctx
                .store
                .find_enabled_runtime_framework(&deploy.runtime_framework)?
        };
        let req = run_request(&self.ctx.deploy, repo, deploy, task, framework.as_ref())?;
        let svc_name = match self.ctx.runner.run(&req).await {
            Ok(name) => name,
            Err(e) => {
                let reason = format!("call image runner failed: {e}");
                self.ctx.record(task.id, &TaskEvent::RunFailed { reason: reason.clone() }, "deploy_failed");
                return Err(WorkflowError::DeployFailed(reason));
            }
        };

        if let Err(e) = self.ctx.transition(task.id, &TaskEvent::RunSubmitted { svc_name }, "deploying") {
            if let Err(stop_err) = self.ctx.runner.stop(&service_request(repo, deploy)).await {
                warn!(task_id = task.id, error = %stop_err, "failed to stop unbound service");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn check_deploy(&self, task_id: TaskId, repo: &RepoInfo) -> WorkflowResult<Check> {
        let task = self.ctx.reload_task(task_id)?;
        let deploy = self.ctx.reload_deploy(task.deploy_id)?;
        let resp = match self.ctx.runner.status(&service_request(repo, &deploy)).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(task_id, error = %e, "failed to call runner status api");
                return Ok(Check::Continue);
            }
        };

        if resp.deploy_id > task.deploy_id {
            info!(task_id, newer = resp.deploy_id, "cancelled by a newer deploy");
            self.ctx.transition(task_id, &TaskEvent::Superseded, "deploy_cancelled")?;
            return Ok(Check::Done);
        }

        match resp.status() {
            Some(RunStatusCode::Pending | RunStatusCode::Deploying) => {
                let limit = self.ctx.settings.deploy_timeout(deploy.deploy_type.is_space());
                if epoch_secs().saturating_sub(task.deploy_started_at()) >= limit.as_secs() {
                    warn!(task_id, svc_name = %deploy.svc_name, "deploy timed out, stopping service");
                    self.ctx.runner.stop(&service_request(repo, &deploy)).await?;
                    let event = TaskEvent::RunFailed {
                        reason: DEPLOY_TIMEOUT_REASON.to_string(),
                    };
                    self.ctx.transition(task_id, &event, "deploy_failed")?;
                    return Err(WorkflowError::TimedOut(task_id));
                }
                Ok(Check::Continue)
            }
            Some(RunStatusCode::Startup) => {
                if task.phase == TaskPhase::Run(RunTaskStatus::Deploying) {
                    self.ctx.transition(task_id, &TaskEvent::RunStartingUp, "deploy_startup")?;
                }
                Ok(Check::Continue)
            }
            Some(RunStatusCode::Running) => {
                info!(task_id, endpoint = %resp.endpoint, "image running");
                let event = TaskEvent::RunRunning {
                    endpoint: resp.endpoint,
                };
                self.ctx.transition(task_id, &event, "deploy_running")?;
                Ok(Check::Done)
            }
            Some(RunStatusCode::DeployFailed) => {
                let event = TaskEvent::RunFailed {
                    reason: resp.message.clone(),
                };
                self.ctx.record(task_id, &event, "deploy_failed");
                Err(WorkflowError::DeployFailed(resp.message))
            }
            Some(RunStatusCode::RunTimeError) => {
                let event = TaskEvent::RunRuntimeError {
                    reason: resp.message.clone(),
                };
                self.ctx.record(task_id, &event, "deploy_runtime_error");
                Err(WorkflowError::RuntimeError(resp.message))
            }
            Some(RunStatusCode::Sleeping | RunStatusCode::Stopped) | None => {
                Err(WorkflowError::UnknownStatus {
                    stage: "deploy",
                    code: resp.code,
                })
            }
        }
    }

    fn stop_service_detached(&self, task_id: TaskId, repo: RepoInfo) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let result = match ctx.reload_deploy(repo.deploy_id) {
                Ok(deploy) => ctx
                    .runner
                    .stop(&service_request(&repo, &deploy))
                    .await
                    .map_err(|e: RemoteError| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = result {
                error!(task_id, error = %e, "failed to stop service");
            }
        });
    }
}
