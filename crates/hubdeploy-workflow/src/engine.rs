//! In-process workflow engine.
//!
//! A deploy workflow runs the build activity then the deploy activity,
//! each under the retry policy. Workflows are keyed by an id derived from
//! the deploy, and starting a workflow cancels any running one with the
//! same id first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hubdeploy_state::{Deploy, TaskId};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::activities::DeployActivities;
use crate::context::ActivityContext;
use crate::error::{WorkflowError, WorkflowResult};
use crate::retry::RetryPolicy;

const DEFAULT_CANCEL_WAIT: Duration = Duration::from_secs(10);
const PATH_PREFIX_LEN: usize = 20;

/// `deploy-{type}-{path prefix}-{deploy id}`, where the path keeps only
/// `[A-Za-z0-9-]` with slashes turned into dashes.
pub fn workflow_id(deploy: &Deploy) -> String {
    let path: String = deploy
        .git_path
        .chars()
        .map(|c| if c == '/' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(PATH_PREFIX_LEN)
        .collect();
    format!("deploy-{}-{}-{}", deploy.deploy_type.workflow_label(), path, deploy.id)
}

struct RunningWorkflow {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<WorkflowResult<Vec<String>>>,
}

pub struct WorkflowEngine {
    activities: Arc<DeployActivities>,
    policy: RetryPolicy,
    cancel_wait: Duration,
    running: Mutex<HashMap<String, RunningWorkflow>>,
}

impl WorkflowEngine {
    pub fn new(activities: Arc<DeployActivities>, policy: RetryPolicy) -> Self {
        Self {
            activities,
            policy,
            cancel_wait: DEFAULT_CANCEL_WAIT,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// How long to wait for a cancelled workflow before starting its
    /// replacement anyway.
    pub fn with_cancel_wait(mut self, wait: Duration) -> Self {
        self.cancel_wait = wait;
        self
    }

    pub fn activities(&self) -> &Arc<DeployActivities> {
        &self.activities
    }

    /// Start the workflow for a deploy's tasks, cancelling a running
    /// workflow with the same id first. Returns the workflow id.
    pub async fn start_with_cancel_old(
        &self,
        build_task: Option<TaskId>,
        run_task: TaskId,
    ) -> WorkflowResult<String> {
        let ctx = self.activities.context();
        let task = ctx.reload_task(run_task)?;
        if task.phase.is_build() {
            return Err(WorkflowError::InvalidInput(format!("task {run_task} is not a run task")));
        }
        let deploy = ctx.reload_deploy(task.deploy_id)?;
        let id = workflow_id(&deploy);

        let old = self.running.lock().await.remove(&id);
        if let Some(old) = old {
            self.stop(&id, old).await;
        }

        let (cancel, cancel_rx) = watch::channel(false);
        let activities = self.activities.clone();
        let policy = self.policy.clone();
        let handle = tokio::spawn(run_workflow(activities, policy, cancel_rx, build_task, run_task));

        let mut running = self.running.lock().await;
        running.retain(|_, wf| !wf.handle.is_finished());
        if let Some(raced) = running.insert(id.clone(), RunningWorkflow { cancel, handle }) {
            let _ = raced.cancel.send(true);
        }
        info!(workflow_id = %id, ?build_task, run_task, "deploy workflow started");
        Ok(id)
    }

    async fn stop(&self, id: &str, mut wf: RunningWorkflow) {
        if wf.handle.is_finished() {
            return;
        }
        info!(workflow_id = %id, "cancelling running workflow");
        let _ = wf.cancel.send(true);
        if tokio::time::timeout(self.cancel_wait, &mut wf.handle).await.is_err() {
            warn!(workflow_id = %id, "workflow did not stop in time, aborting it");
            wf.handle.abort();
        }
    }

    /// Cancel a workflow and wait for it. Returns false if none was known.
    pub async fn cancel(&self, id: &str) -> bool {
        let wf = self.running.lock().await.remove(id);
        match wf {
            Some(wf) => {
                self.stop(id, wf).await;
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.running
            .lock()
            .await
            .get(id)
            .is_some_and(|wf| !wf.handle.is_finished())
    }

    /// Wait for a workflow to finish and take its result.
    pub async fn wait(&self, id: &str) -> Option<WorkflowResult<Vec<String>>> {
        let wf = self.running.lock().await.remove(id)?;
        Some(match wf.handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(workflow_id = %id, error = %e, "workflow task failed");
                Err(WorkflowError::Aborted(id.to_string()))
            }
        })
    }

    /// Cancel every running workflow.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, RunningWorkflow)> = self.running.lock().await.drain().collect();
        for (id, wf) in drained {
            self.stop(&id, wf).await;
        }
        info!("workflow engine stopped");
    }
}

async fn run_workflow(
    activities: Arc<DeployActivities>,
    policy: RetryPolicy,
    cancel: watch::Receiver<bool>,
    build_task: Option<TaskId>,
    run_task: TaskId,
) -> WorkflowResult<Vec<String>> {
    let timeout = activities.settings().activity_timeout;
    let mut steps = vec!["deploy workflow started".to_string()];

    match build_task {
        Some(task_id) => {
            steps.push("build started".to_string());
            let result = policy
                .run("build", task_id, &ActivityContext::new(cancel.clone()), |_| {
                    let acts = activities.clone();
                    let actx = ActivityContext::new(cancel.clone()).with_timeout(timeout);
                    async move { acts.build(&actx, task_id).await }
                })
                .await;
            if let Err(e) = result {
                error!(task_id, error = %e, "build activity failed");
                return Err(e);
            }
            steps.push("build succeeded".to_string());
        }
        None => steps.push("build skipped".to_string()),
    }

    steps.push("deploy started".to_string());
    let result = policy
        .run("deploy", run_task, &ActivityContext::new(cancel.clone()), |_| {
            let acts = activities.clone();
            let actx = ActivityContext::new(cancel.clone()).with_timeout(timeout);
            async move { acts.deploy(&actx, run_task).await }
        })
        .await;
    if let Err(e) = result {
        error!(task_id = run_task, error = %e, "deploy activity failed");
        return Err(e);
    }
    steps.push("deploy succeeded".to_string());
    steps.push("deploy workflow completed".to_string());
    Ok(steps)
}
