//! FIFO scheduler. Runs deploy tasks in arrival order.
//!
//! A bounded channel of runners feeds a single consumer loop that spawns
//! each runner under the task timeout. A runner that overruns it is
//! aborted, which stops any service it already submitted. After every runner finishes the
//! loop pulls the next task, so the channel stays full. Task selection
//! goes through one cursor behind a mutex, which keeps ordering strict even
//! though runners execute concurrently.

use std::sync::Arc;

use hubdeploy_state::{DeployTask, TaskEvent, TaskId};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::builder_runner::BuilderRunner;
use crate::deploy_runner::DeployRunner;
use crate::error::{SchedulerError, SchedulerResult};
use crate::repo::resolve_repo;
use crate::runner::{Runner, RunnerContext, SleepTask};

type BoxedRunner = Box<dyn Runner>;

/// What [`FifoScheduler::next`] put on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queued {
    Task(TaskId),
    Sleep,
}

pub struct FifoScheduler {
    ctx: Arc<RunnerContext>,
    tx: mpsc::Sender<BoxedRunner>,
    rx: Mutex<Option<mpsc::Receiver<BoxedRunner>>>,
    /// Last task handed to a runner.
    last: Mutex<Option<TaskId>>,
}

impl FifoScheduler {
    pub fn new(ctx: Arc<RunnerContext>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(ctx.settings.queue_capacity);
        Arc::new(Self {
            ctx,
            tx,
            rx: Mutex::new(Some(rx)),
            last: Mutex::new(None),
        })
    }

    pub fn context(&self) -> &Arc<RunnerContext> {
        &self.ctx
    }

    /// Nudge the scheduler after new tasks were written.
    pub async fn queue(&self, task_id: TaskId) -> SchedulerResult<()> {
        debug!(task_id, "task queued");
        self.next().await.map(|_| ())
    }

    /// Put the task after the cursor on the queue, or a sleep task when
    /// there is none.
    pub async fn next(&self) -> SchedulerResult<Queued> {
        let mut last = self.last.lock().await;

        let found = match *last {
            None => self.ctx.store.get_new_task_first(),
            Some(id) => self.ctx.store.get_new_task_after(id),
        };
        let task = match found {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(last = ?*last, "no more tasks to run, scheduling a sleep task");
                return self.enqueue_sleep().await;
            }
            Err(e) => {
                error!(error = %e, "cannot get next task");
                return self.enqueue_sleep().await;
            }
        };

        let runner = match self.make_runner(&task) {
            Ok(Some(runner)) => runner,
            Ok(None) => {
                *last = Some(task.id);
                return self.enqueue_sleep().await;
            }
            Err(e) => {
                error!(task_id = task.id, error = %e, "failed to create runner");
                self.fail_following_tasks(task.id, &e.reason());
                *last = Some(task.id);
                return self.enqueue_sleep().await;
            }
        };

        *last = Some(task.id);
        self.tx.send(runner).await.map_err(|_| SchedulerError::QueueClosed)?;
        info!(task_id = task.id, deploy_id = task.deploy_id, "enqueued next task");
        Ok(Queued::Task(task.id))
    }

    /// Build the runner for a task. `Ok(None)` means the task was cancelled
    /// because its repository is gone.
    fn make_runner(&self, task: &DeployTask) -> SchedulerResult<Option<BoxedRunner>> {
        let deploy = self.ctx.reload_deploy(task.deploy_id)?;
        let Some(repo) = resolve_repo(&self.ctx.store, &deploy)? else {
            warn!(task_id = task.id, deploy_id = deploy.id, "cancel deploy task as repo not found");
            if let Err(e) = self.ctx.transition(task.id, &TaskEvent::RepoNotFound, "repo_not_found") {
                error!(task_id = task.id, error = %e, "failed to cancel deploy task");
            }
            return Ok(None);
        };

        let runner: BoxedRunner = if task.phase.is_build() {
            Box::new(BuilderRunner::new(self.ctx.clone(), repo, task.clone()))
        } else {
            Box::new(DeployRunner::new(self.ctx.clone(), repo, task.clone()))
        };
        Ok(Some(runner))
    }

    async fn enqueue_sleep(&self) -> SchedulerResult<Queued> {
        let sleep = SleepTask {
            duration: self.ctx.settings.idle_sleep,
        };
        self.tx
            .send(Box::new(sleep))
            .await
            .map_err(|_| SchedulerError::QueueClosed)?;
        Ok(Queued::Sleep)
    }

    /// Run until `shutdown` flips. Can only be called once.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> SchedulerResult<()> {
        let mut rx = self.rx.lock().await.take().ok_or(SchedulerError::QueueClosed)?;
        info!(capacity = self.ctx.settings.queue_capacity, "fifo scheduler started");

        let prefill = self.clone();
        tokio::spawn(async move {
            for _ in 0..prefill.ctx.settings.queue_capacity {
                if let Err(e) = prefill.next().await {
                    error!(error = %e, "failed to get next task");
                }
            }
        });

        loop {
            tokio::select! {
                Some(mut runner) = rx.recv() => {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.execute(runner.as_mut()).await;
                        if let Err(e) = scheduler.next().await {
                            error!(error = %e, "failed to get next task");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("fifo scheduler shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn execute(&self, runner: &mut dyn Runner) {
        let task_id = runner.watch_id();
        if task_id != 0 {
            debug!(task_id, "dequeued a task to run");
        }
        let outcome = tokio::time::timeout(self.ctx.settings.task_timeout, runner.run()).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                runner.abort().await;
                Err(SchedulerError::Timeout(task_id))
            }
        };
        if let Err(e) = result {
            error!(task_id, error = %e, "failed to run task");
            if task_id != 0 {
                self.fail_following_tasks(task_id, &e.reason());
            }
        }
    }

    fn fail_following_tasks(&self, task_id: TaskId, reason: &str) {
        info!(task_id, "failing task and its following tasks");
        match self.ctx.store.fail_following_tasks(task_id, reason) {
            Ok(cancelled) => {
                let deploy_id = cancelled.first().map(|t| t.deploy_id).unwrap_or_default();
                debug!(task_id, deploy_id, cancelled = cancelled.len(), "failure cascaded");
            }
            Err(e) => error!(task_id, error = %e, "failed to cascade task failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RunnerSettings;
    use crate::testutil::{Harness, fast_settings};
    use hubdeploy_core::epoch_secs;
    use hubdeploy_remote::{MemoryImageBuilder, MemoryImageRunner, RunStatusCode};
    use hubdeploy_state::{Deploy, DeployStatus, RunTaskStatus, TaskPhase};
    use std::time::Duration;

    async fn wait_for_task(h: &Harness, task_id: TaskId, phase: TaskPhase) {
        for _ in 0..500 {
            if h.task(task_id).phase == phase {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never reached {phase:?}");
    }

    #[tokio::test]
    async fn next_is_fifo_then_sleeps() {
        let h = Harness::new(MemoryImageBuilder::default(), MemoryImageRunner::default());
        let (_, _, first) = h.space_deploy("img:1");
        let (_, _, second) = h.space_deploy("img:2");
        let scheduler = FifoScheduler::new(h.ctx.clone());

        assert_eq!(scheduler.next().await.unwrap(), Queued::Task(first.id));
        assert_eq!(scheduler.next().await.unwrap(), Queued::Task(second.id));
        assert_eq!(scheduler.next().await.unwrap(), Queued::Sleep);
    }

    #[tokio::test]
    async fn empty_store_queues_sleep() {
        let h = Harness::new(MemoryImageBuilder::default(), MemoryImageRunner::default());
        let scheduler = FifoScheduler::new(h.ctx.clone());
        assert_eq!(scheduler.next().await.unwrap(), Queued::Sleep);
    }

    #[tokio::test]
    async fn missing_repo_cancels_task_and_moves_on() {
        let h = Harness::new(MemoryImageBuilder::default(), MemoryImageRunner::default());
        let orphan = Deploy {
            space_id: Some(404),
            git_path: "acme/gone".to_string(),
            image_id: "img:0".to_string(),
            ..Default::default()
        };
        let (orphan, tasks) = h
            .ctx
            .store
            .create_deploy_with_tasks(&orphan, vec![DeployTask::run(0)])
            .unwrap();
        let (_, _, run) = h.space_deploy("img:1");
        let scheduler = FifoScheduler::new(h.ctx.clone());

        assert_eq!(scheduler.next().await.unwrap(), Queued::Sleep);
        assert_eq!(h.task(tasks[0].id).phase, TaskPhase::Run(RunTaskStatus::Cancelled));
        assert_eq!(h.deploy(orphan.id).message, "repo not found");
        assert_eq!(scheduler.next().await.unwrap(), Queued::Task(run.id));
    }

    #[tokio::test]
    async fn builds_then_deploys() {
        let h = Harness::new(
            MemoryImageBuilder::succeeding("img:9"),
            MemoryImageRunner::running("http://chat.local"),
        );
        let (deploy, build, run) = h.space_deploy("");
        let scheduler = FifoScheduler::new(h.ctx.clone());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(rx));

        let deploy = h.wait_for(deploy.id, |d| d.status == DeployStatus::Running).await;
        assert_eq!(deploy.image_id, "img:9");
        assert_eq!(deploy.endpoint, "http://chat.local");
        assert_eq!(h.task(build.id).phase, TaskPhase::Build(hubdeploy_state::BuildTaskStatus::Succeed));
        assert_eq!(h.task(run.id).phase, TaskPhase::Run(RunTaskStatus::Running));
        assert_eq!(h.builder.builds().len(), 1);
        assert_eq!(h.runner.runs().len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn build_failure_cancels_following_run() {
        let builder = MemoryImageBuilder::default();
        builder.reject_builds(1, "no quota");
        let h = Harness::new(builder, MemoryImageRunner::default());
        let (deploy, build, run) = h.space_deploy("");
        let scheduler = FifoScheduler::new(h.ctx.clone());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(rx));

        wait_for_task(&h, run.id, TaskPhase::Run(RunTaskStatus::Cancelled)).await;
        h.wait_for(deploy.id, |d| d.status == DeployStatus::BuildFailed).await;
        assert_eq!(h.task(build.id).phase, TaskPhase::Build(hubdeploy_state::BuildTaskStatus::Failed));
        assert!(h.runner.runs().is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn runtime_error_survives_the_cascade() {
        let runner = MemoryImageRunner::default();
        runner.push_status(RunStatusCode::RunTimeError, "oom killed");
        let h = Harness::new(MemoryImageBuilder::default(), runner);
        let (deploy, _, run) = h.space_deploy("img:1");
        let scheduler = FifoScheduler::new(h.ctx.clone());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(rx));

        wait_for_task(&h, run.id, TaskPhase::Run(RunTaskStatus::RunTimeError)).await;
        // Let the scheduler finish the failed runner before looking again.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let deploy = h.deploy(deploy.id);
        assert_eq!(deploy.status, DeployStatus::RunTimeError);
        assert_eq!(deploy.message, "oom killed");
        assert_eq!(h.task(run.id).message, "oom killed");

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn slow_build_does_not_shorten_deploy_window() {
        let runner = MemoryImageRunner::default();
        runner.push_status(RunStatusCode::Deploying, "");
        runner.push_status(RunStatusCode::Running, "http://chat.local");
        let settings = RunnerSettings {
            space_deploy_timeout: Duration::from_secs(30 * 60),
            ..fast_settings()
        };
        let h = Harness::with_settings(MemoryImageBuilder::succeeding("img:9"), runner, settings);
        let (deploy, _, mut run) = h.space_deploy("");
        run.created_at = epoch_secs() - 31 * 60;
        h.ctx.store.update_deploy_task(&run).unwrap();
        let scheduler = FifoScheduler::new(h.ctx.clone());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(rx));

        let deploy = h.wait_for(deploy.id, |d| d.status == DeployStatus::Running).await;
        assert_eq!(deploy.image_id, "img:9");
        assert!(h.runner.stops().is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn task_timeout_stops_submitted_service() {
        let settings = RunnerSettings {
            task_timeout: Duration::from_millis(100),
            ..fast_settings()
        };
        let h = Harness::with_settings(MemoryImageBuilder::default(), MemoryImageRunner::default(), settings);
        let (deploy, _, run) = h.space_deploy("img:1");
        let scheduler = FifoScheduler::new(h.ctx.clone());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(rx));

        let deploy = h.wait_for(deploy.id, |d| d.status == DeployStatus::DeployFailed).await;
        assert_eq!(deploy.message, format!("task {} timed out", run.id));
        assert_eq!(h.task(run.id).phase, TaskPhase::Run(RunTaskStatus::Failed));
        let stops = h.runner.stops();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].svc_name, "u-test");

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let h = Harness::new(MemoryImageBuilder::default(), MemoryImageRunner::default());
        let scheduler = FifoScheduler::new(h.ctx.clone());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(rx.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = scheduler.clone().run(rx).await.unwrap_err();
        assert!(matches!(err, SchedulerError::QueueClosed));

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
