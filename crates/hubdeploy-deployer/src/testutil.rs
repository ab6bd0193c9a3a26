use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hubdeploy_core::{DeployConfig, MemoryLogCollector};
use hubdeploy_remote::{MemoryImageBuilder, MemoryImageRunner};
use hubdeploy_scheduler::{RunnerContext, RunnerSettings};
use hubdeploy_state::{Deploy, DeployTask, Model, Space, StateStore, TaskId};

use crate::deployer::Deployer;
use crate::dispatch::TaskDispatcher;
use crate::error::DeployerResult;

/// Records dispatched `(build, run)` task ids instead of running them.
#[derive(Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<(Option<TaskId>, TaskId)>>,
}

impl RecordingDispatcher {
    pub fn calls(&self) -> Vec<(Option<TaskId>, TaskId)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn dispatch(&self, build: Option<&DeployTask>, run: &DeployTask) -> DeployerResult<()> {
        self.calls.lock().unwrap().push((build.map(|t| t.id), run.id));
        Ok(())
    }
}

pub struct Harness {
    pub deployer: Deployer,
    pub builder: Arc<MemoryImageBuilder>,
    pub runner: Arc<MemoryImageRunner>,
    pub logs: Arc<MemoryLogCollector>,
    pub dispatcher: Arc<RecordingDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_space(&Space {
                id: 3,
                path: "acme/chat".to_string(),
                sdk: "gradio".to_string(),
                ..Default::default()
            })
            .unwrap();
        store
            .put_model(&Model {
                id: 5,
                path: "acme/llm".to_string(),
                ..Default::default()
            })
            .unwrap();

        let builder = Arc::new(MemoryImageBuilder::default());
        let runner = Arc::new(MemoryImageRunner::default());
        let logs = Arc::new(MemoryLogCollector::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let ctx = Arc::new(RunnerContext {
            store,
            builder: builder.clone(),
            runner: runner.clone(),
            logs: logs.clone(),
            settings: RunnerSettings::default(),
            deploy: DeployConfig::default(),
        });
        Self {
            deployer: Deployer::new(ctx, dispatcher.clone()),
            builder,
            runner,
            logs,
            dispatcher,
        }
    }

    pub fn store(&self) -> &StateStore {
        self.deployer.store()
    }

    pub fn deploy(&self, id: u64) -> Deploy {
        self.store().get_deploy(id).unwrap().unwrap()
    }

    pub fn tasks(&self, deploy_id: u64) -> Vec<DeployTask> {
        self.store().get_deploy_tasks_of_deploy(deploy_id).unwrap()
    }
}
