use std::sync::Arc;
use std::time::Duration;

use hubdeploy_core::{DeployConfig, MemoryLogCollector};
use hubdeploy_remote::{MemoryImageBuilder, MemoryImageRunner};
use hubdeploy_state::{
    BuildTaskStatus, Deploy, DeployStatus, DeployTask, Space, StateStore,
};

use crate::repo::{RepoInfo, resolve_repo};
use crate::runner::RunnerContext;
use crate::settings::RunnerSettings;

pub fn fast_settings() -> RunnerSettings {
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
    pub logs: Arc<MemoryLogCollector>,
}

impl Harness {
    pub fn new(builder: MemoryImageBuilder, runner: MemoryImageRunner) -> Self {
        Self::with_settings(builder, runner, fast_settings())
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
        let logs = Arc::new(MemoryLogCollector::new());
        let ctx = Arc::new(RunnerContext {
            store,
            builder: builder.clone(),
            runner: runner.clone(),
            logs: logs.clone(),
            settings,
            deploy: DeployConfig::default(),
        });
        Self {
            ctx,
            builder,
            runner,
            logs,
        }
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

    pub fn repo(&self, deploy: &Deploy) -> RepoInfo {
        resolve_repo(&self.ctx.store, deploy).unwrap().unwrap()
    }

    pub fn deploy(&self, id: u64) -> Deploy {
        self.ctx.store.get_deploy(id).unwrap().unwrap()
    }

    pub fn task(&self, id: u64) -> DeployTask {
        self.ctx.store.get_deploy_task(id).unwrap().unwrap()
    }

    /// Poll until the deploy satisfies `done`, for at most five seconds.
    pub async fn wait_for(&self, deploy_id: u64, done: impl Fn(&Deploy) -> bool) -> Deploy {
        for _ in 0..500 {
            let deploy = self.deploy(deploy_id);
            if done(&deploy) {
                return deploy;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("deploy {deploy_id} never reached the expected state");
    }
}
