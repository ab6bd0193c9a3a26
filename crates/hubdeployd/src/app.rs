//! Process-wide registry of the daemon's components.

use std::sync::Arc;
use std::time::Duration;

use hubdeploy_core::{DriverKind, HubConfig, LogCollector, MemoryLogCollector};
use hubdeploy_deployer::{Deployer, FifoDispatcher, TaskDispatcher, WorkflowDispatcher};
use hubdeploy_remote::{
    HttpImageBuilder, HttpImageRunner, ImageBuilder, ImageRunner, MemoryImageBuilder,
    MemoryImageRunner,
};
use hubdeploy_scheduler::{FifoScheduler, RunnerContext, RunnerSettings};
use hubdeploy_state::StateStore;
use hubdeploy_workflow::{ActivitySettings, DeployActivities, RetryPolicy, WorkflowEngine};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Component driving build and run tasks.
pub enum Driver {
    Fifo(Arc<FifoScheduler>),
    Workflow(Arc<WorkflowEngine>),
}

pub struct AppContext {
    pub config: HubConfig,
    pub runner_ctx: Arc<RunnerContext>,
    pub deployer: Arc<Deployer>,
    pub driver: Driver,
}

impl AppContext {
    /// Build the registry with HTTP clients for the configured remotes.
    /// An empty endpoint selects an in-process fake, for local runs.
    pub fn new(config: HubConfig, store: StateStore) -> anyhow::Result<Self> {
        let remote = &config.remote;
        let timeout = Duration::from_secs(remote.request_timeout_secs);
        let api_key = (!remote.api_key.is_empty()).then(|| remote.api_key.clone());

        let builder: Arc<dyn ImageBuilder> = if remote.builder_endpoint.is_empty() {
            warn!("no image builder endpoint configured, using in-process builder");
            Arc::new(MemoryImageBuilder::default())
        } else {
            Arc::new(HttpImageBuilder::new(&remote.builder_endpoint, api_key.clone(), timeout)?)
        };
        let runner: Arc<dyn ImageRunner> = if remote.runner_endpoint.is_empty() {
            warn!("no image runner endpoint configured, using in-process runner");
            Arc::new(MemoryImageRunner::default())
        } else {
            Arc::new(HttpImageRunner::new(&remote.runner_endpoint, api_key, timeout)?)
        };

        Ok(Self::with_remotes(config, store, builder, runner))
    }

    pub fn with_remotes(
        config: HubConfig,
        store: StateStore,
        builder: Arc<dyn ImageBuilder>,
        runner: Arc<dyn ImageRunner>,
    ) -> Self {
        let logs: Arc<dyn LogCollector> = Arc::new(MemoryLogCollector::new());
        let runner_ctx = Arc::new(RunnerContext {
            store,
            builder,
            runner,
            logs,
            settings: RunnerSettings::from_config(&config),
            deploy: config.deploy.clone(),
        });

        let (driver, dispatcher): (Driver, Arc<dyn TaskDispatcher>) = match config.deploy.driver {
            DriverKind::Fifo => {
                let scheduler = FifoScheduler::new(runner_ctx.clone());
                (
                    Driver::Fifo(scheduler.clone()),
                    Arc::new(FifoDispatcher::new(scheduler)),
                )
            }
            DriverKind::Workflow => {
                let activities = Arc::new(DeployActivities::new(
                    runner_ctx.clone(),
                    ActivitySettings::from_config(&config),
                ));
                let engine = Arc::new(WorkflowEngine::new(
                    activities,
                    RetryPolicy::from_config(&config.workflow),
                ));
                (
                    Driver::Workflow(engine.clone()),
                    Arc::new(WorkflowDispatcher::new(engine)),
                )
            }
        };
        info!(driver = ?config.deploy.driver, "deploy driver selected");

        let deployer = Arc::new(Deployer::new(runner_ctx.clone(), dispatcher));
        Self {
            config,
            runner_ctx,
            deployer,
            driver,
        }
    }

    /// Start the background loop of the driver, if it has one.
    pub fn spawn_driver(&self, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        match &self.driver {
            Driver::Fifo(scheduler) => {
                let scheduler = scheduler.clone();
                Some(tokio::spawn(async move {
                    if let Err(e) = scheduler.run(shutdown).await {
                        error!(error = %e, "fifo scheduler stopped with error");
                    }
                }))
            }
            Driver::Workflow(_) => None,
        }
    }

    /// Cancel in-flight work that outlives the driver loop.
    pub async fn shutdown(&self) {
        if let Driver::Workflow(engine) = &self.driver {
            engine.shutdown().await;
        }
    }
}
