use std::sync::Arc;
use std::time::Duration;

use hubdeploy_core::{DeployConfig, MemoryLogCollector};
use hubdeploy_remote::{MemoryImageBuilder, MemoryImageRunner};
use hubdeploy_scheduler::{RunnerContext, RunnerSettings};
use hubdeploy_state::{BuildTaskStatus, Deploy, DeployStatus, DeployTask, Space, StateStore};

use crate::activities::{ActivitySettings, DeployActivities};

pub fn fast_activity_settings() -> ActivitySettings {
    ActivitySettings {
        heartbeat: Duration::from_millis(2),
        status_check: Duration::from_millis(5),
        build_timeout: Duration::from_secs(3600),
        activity_timeout: Duration::from_secs(60),
    }
}

fn fast_runner_settings() -> RunnerSettings {
    RunnerSettings {
        queue_capacity: 4,
        task_timeout: Duration::from_secs(5),
        idle_sleep: Duration::from_millis(10),
        build_poll: Duration::from_millis(5),
        deploy_poll: Duration::from_millis(5),
        image_wait: Duration::from_millis(5),
        space_deploy_timeout: Duration::from_secs(3600),
        model_deploy_timeout: Duration::from_secs(3600),
    }
}

pub struct Harness {
    pub ctx: Arc<RunnerContext>,
    pub builder: Arc<MemoryImageBuilder>,
    pub runner: Arc<MemoryImageRunner>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(MemoryImageBuilder::default(), MemoryImageRunner::default())
    }

    pub fn with(builder: MemoryImageBuilder, runner: MemoryImageRunner) -> Self {
        Self::with_settings(builder, runner, fast_runner_settings())
    }

    pub fn with_settings(
        builder: MemoryImageBuilder,
        runner: MemoryImageRunner,
        settings: RunnerSettings,
    ) -> Self {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_space(&Space {
                id: 3,
                path: "acme/chat".to_string(),
                sdk: "gradio".to_string(),
                ..Default::default()
            })
            .unwrap();
        let builder = Arc::new(builder);
        let runner = Arc::new(runner);
        let ctx = Arc::new(RunnerContext {
            store,
            builder: builder.clone(),
            runner: runner.clone(),
            logs: Arc::new(MemoryLogCollector::new()),
            settings,
            deploy: DeployConfig::default(),
        });
        Self { ctx, builder, runner }
    }

    pub fn activities(&self, settings: ActivitySettings) -> Arc<DeployActivities> {
        Arc::new(DeployActivities::new(self.ctx.clone(), settings))
    }

    /// A space deploy with a build and a run task. A non-empty image id
    /// skips the build.
    pub fn space_deploy(&self, image_id: &str) -> (Deploy, DeployTask, DeployTask) {
        let (status, build) = if image_id.is_empty() {
            (DeployStatus::Pending, DeployTask::build(0, BuildTaskStatus::Pending, ""))
        } else {
            (DeployStatus::BuildSkip, DeployTask::build(0, BuildTaskStatus::Skip, "Skip"))
        };
        let deploy = Deploy {
            space_id: Some(3),
            git_path: "acme/chat".to_string(),
            git_branch: "main".to_string(),
            hardware: r#"{"cpu":{"num":"2"},"memory":"4Gi"}"#.to_string(),
            image_id: image_id.to_string(),
            svc_name: "u-test".to_string(),
            status,
            ..Default::default()
        };
        let (deploy, tasks) = self
            .ctx
            .store
            .create_deploy_with_tasks(&deploy, vec![build, DeployTask::run(0)])
            .unwrap();
        (deploy, tasks[0].clone(), tasks[1].clone())
    }

    pub fn deploy(&self, id: u64) -> Deploy {
        self.ctx.store.get_deploy(id).unwrap().unwrap()
    }

    pub fn task(&self, id: u64) -> DeployTask {
        self.ctx.store.get_deploy_task(id).unwrap().unwrap()
    }
}
