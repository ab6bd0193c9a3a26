//! Image build task runner.

use std::sync::Arc;

use async_trait::async_trait;
use hubdeploy_remote::{BuildStatusCode, RemoteError};
use hubdeploy_state::{BuildTaskStatus, DeployTask, TaskEvent, TaskId, TaskPhase};
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::repo::RepoInfo;
use crate::request::{build_request, build_status_request};
use crate::runner::{Runner, RunnerContext};

/// Submits a build to the image builder and polls it to completion.
pub struct BuilderRunner {
    ctx: Arc<RunnerContext>,
    repo: RepoInfo,
    task: DeployTask,
}

impl BuilderRunner {
    pub fn new(ctx: Arc<RunnerContext>, repo: RepoInfo, task: DeployTask) -> Self {
        Self { ctx, repo, task }
    }

    async fn submit(&mut self) -> SchedulerResult<()> {
        let deploy = self.ctx.reload_deploy(self.task.deploy_id)?;
        let req = build_request(&self.repo, &deploy, &self.task);
        if let Err(e) = self.ctx.builder.build(&req).await {
            let reason = match &e {
                RemoteError::Rejected { code, message } => {
                    format!("image builder reported error, code: {code}, msg: {message}")
                }
                other => format!("call image builder failed: {other}"),
            };
            self.ctx.record(self.task.id, &TaskEvent::BuildFailed { reason: reason.clone() }, "build_failed");
            return Err(SchedulerError::BuildFailed(reason));
        }
        let (_, task) = self.ctx.transition(self.task.id, &TaskEvent::BuildStarted, "build_in_progress")?;
        self.task = task;
        Ok(())
    }
}

#[async_trait]
impl Runner for BuilderRunner {
    fn watch_id(&self) -> TaskId {
        self.task.id
    }

    async fn run(&mut self) -> SchedulerResult<()> {
        info!(task_id = self.task.id, deploy_id = self.task.deploy_id, "run image build task");
        self.task = self.ctx.reload_task(self.task.id)?;

        if matches!(
            self.task.phase,
            TaskPhase::Build(BuildTaskStatus::Pending | BuildTaskStatus::InQueue)
        ) {
            self.submit().await?;
        }

        let poll = self.ctx.settings.build_poll;
        loop {
            let deploy = self.ctx.reload_deploy(self.task.deploy_id)?;
            let req = build_status_request(&self.repo, &deploy, &self.task);
            let resp = match self.ctx.builder.status(&req).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(task_id = self.task.id, error = %e, "failed to call builder status api");
                    tokio::time::sleep(poll).await;
                    continue;
                }
            };
            debug!(task_id = self.task.id, code = resp.code, "build status");

            match resp.status() {
                Some(BuildStatusCode::Pending | BuildStatusCode::InProgress) => {
                    tokio::time::sleep(poll).await;
                }
                Some(BuildStatusCode::Succeeded) => {
                    info!(task_id = self.task.id, repo = %self.repo.path, image_id = %resp.image_id, "image build succeeded");
                    let event = TaskEvent::BuildSucceeded {
                        image_id: resp.image_id,
                    };
                    self.ctx.transition(self.task.id, &event, "build_succeeded")?;
                    return Ok(());
                }
                Some(BuildStatusCode::Failed) => {
                    let reason = if resp.message.is_empty() {
                        "build failed".to_string()
                    } else {
                        resp.message
                    };
                    info!(task_id = self.task.id, repo = %self.repo.path, %reason, "image build failed");
                    self.ctx.record(
                        self.task.id,
                        &TaskEvent::BuildFailed { reason: reason.clone() },
                        "build_failed",
                    );
                    return Err(SchedulerError::BuildFailed(reason));
                }
                None => {
                    return Err(SchedulerError::UnknownStatus {
                        stage: "build",
                        code: resp.code,
                    });
                }
            }
        }
    }
}
