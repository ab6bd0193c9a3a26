//! The deployer facade.
//!
//! Everything outside the engine talks to [`Deployer`]: it writes deploy
//! rows and their task pairs, hands the tasks to the configured driver,
//! answers status and log queries, and stops or purges services. Cluster
//! queries live in [`crate::cluster`].

use std::sync::Arc;

use hubdeploy_core::{DeployType, HardWare, LogCollector, LogEntry, LogStage, epoch_secs};
use hubdeploy_remote::{ImageBuildStopRequest, Instance, RunStatusCode, ServiceRequest};
use hubdeploy_scheduler::{RunnerContext, split_path};
use hubdeploy_state::{
    BuildTaskStatus, Deploy, DeployId, DeployStatus, DeployTask, StateStore, TaskPhase,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::dispatch::TaskDispatcher;
use crate::error::{DeployerError, DeployerResult};
use crate::ledger::Ledger;
use crate::logs::{MultiLogReader, parse_since_time};
use crate::naming::SvcNameGenerator;

const SKIP_MESSAGE: &str = "Skip";

// ── Requests and reports ───────────────────────────────────────────

/// A request to deploy a repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployRequest {
    pub deploy_name: String,
    pub deploy_type: DeployType,
    pub space_id: Option<u64>,
    pub model_id: Option<u64>,
    /// `namespace/name`.
    pub git_path: String,
    pub git_branch: String,
    pub user_id: u64,
    pub user_name: String,
    /// JSON hardware request.
    pub hardware: String,
    pub env: String,
    pub variables: String,
    pub secret_key: String,
    /// Prebuilt image; skips the build when set.
    pub image_id: String,
    pub cluster_id: String,
    pub order_detail_id: u64,
    pub container_port: u16,
    pub min_replica: u32,
    pub max_replica: u32,
    pub runtime_framework: String,
    pub engine_args: String,
    pub task: String,
    pub annotation: String,
}

impl DeployRequest {
    fn validate(&self) -> DeployerResult<()> {
        if self.space_id.is_some() == self.model_id.is_some() {
            return Err(DeployerError::InvalidInput(
                "exactly one of space_id and model_id must be set".to_string(),
            ));
        }
        split_path(&self.git_path).map_err(|e| DeployerError::InvalidInput(e.to_string()))?;
        parse_hardware(&self.hardware)?;
        check_replicas(i64::from(self.min_replica), i64::from(self.max_replica))?;
        Ok(())
    }

    /// Copy the per-request settings onto a deploy row.
    fn apply_to(&self, deploy: &mut Deploy) {
        deploy.image_id = self.image_id.trim().to_string();
        deploy.annotation = self.annotation.clone();
        deploy.env = self.env.clone();
        deploy.variables = self.variables.clone();
        deploy.hardware = self.hardware.clone();
        deploy.runtime_framework = self.runtime_framework.clone();
        deploy.secret_key = self.secret_key.clone();
        deploy.container_port = self.container_port;
        deploy.min_replica = self.min_replica;
        deploy.max_replica = self.max_replica;
        deploy.engine_args = self.engine_args.clone();
        deploy.cluster_id = self.cluster_id.clone();
        deploy.task = self.task.clone();
        deploy.order_detail_id = self.order_detail_id;
    }
}

/// Changes to a stopped deploy. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployUpdate {
    pub deploy_name: Option<String>,
    pub env: Option<String>,
    pub variables: Option<String>,
    pub hardware: Option<String>,
    pub min_replica: Option<i64>,
    pub max_replica: Option<i64>,
    pub revision: Option<String>,
    pub cluster_id: Option<String>,
    pub engine_args: Option<String>,
    pub runtime_framework: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployStatusReport {
    pub deploy_id: DeployId,
    pub svc_name: String,
    /// Deploy status code, live from the runner when it knows the service.
    pub code: i32,
    pub message: String,
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaReport {
    pub actual: u32,
    pub desired: u32,
    pub instances: Vec<Instance>,
}

fn parse_hardware(json: &str) -> DeployerResult<HardWare> {
    HardWare::from_json(json).map_err(|e| DeployerError::InvalidInput(format!("hardware: {e}")))
}

fn check_replicas(min: i64, max: i64) -> DeployerResult<()> {
    if min < 0 || max < 0 || max < min {
        return Err(DeployerError::InvalidInput(format!("invalid min/max replica {min}/{max}")));
    }
    Ok(())
}

fn replica_count(value: i64) -> DeployerResult<u32> {
    u32::try_from(value).map_err(|_| DeployerError::InvalidInput(format!("invalid replica count {value}")))
}

// ── Deployer ───────────────────────────────────────────────────────

pub struct Deployer {
    pub(crate) ctx: Arc<RunnerContext>,
    pub(crate) ledger: Ledger,
    dispatcher: Arc<dyn TaskDispatcher>,
    names: SvcNameGenerator,
}

impl Deployer {
    pub fn new(ctx: Arc<RunnerContext>, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        let ledger = Ledger::new(ctx.store.clone());
        Self {
            ctx,
            ledger,
            dispatcher,
            names: SvcNameGenerator::new(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.ctx.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub(crate) fn load(&self, deploy_id: DeployId) -> DeployerResult<Deploy> {
        self.ctx
            .store
            .get_deploy(deploy_id)?
            .ok_or(DeployerError::DeployNotFound(deploy_id))
    }

    fn service(&self, deploy: &Deploy) -> DeployerResult<ServiceRequest> {
        let (org, name) = split_path(&deploy.git_path)?;
        Ok(ServiceRequest {
            id: deploy.runner_target_id(),
            org_name: org.to_string(),
            repo_name: name.to_string(),
            cluster_id: deploy.cluster_id.clone(),
            svc_name: deploy.svc_name.clone(),
            deploy_type: deploy.deploy_type,
            user_id: deploy.user_id.to_string(),
            need_details: true,
        })
    }

    fn report(&self, deploy: &Deploy, task_id: u64, stage: LogStage, step: &str, message: &str) {
        self.ctx
            .logs
            .report(LogEntry::new(deploy.id, task_id, stage, step, message));
    }

    /// Latest deploy to reuse for spaces and serverless models, which keep
    /// one service per repository.
    fn reusable_deploy(&self, req: &DeployRequest) -> DeployerResult<Option<Deploy>> {
        let found = match (req.deploy_type, req.space_id, req.model_id) {
            (DeployType::Space, Some(space_id), _) => self.ctx.store.latest_deploy_for_space(space_id)?,
            (DeployType::Serverless, _, Some(model_id)) => self
                .ctx
                .store
                .latest_deploy_for_model(model_id, DeployType::Serverless)?,
            _ => None,
        };
        Ok(found)
    }

    /// Create a deploy with a build and a run task and dispatch them.
    /// Returns the deploy id.
    pub async fn deploy(&self, req: &DeployRequest) -> DeployerResult<DeployId> {
        req.validate()?;
        self.ledger.check_order_detail(req.order_detail_id, 0)?;

        let skip_build = !req.image_id.trim().is_empty();
        let (status, build) = if skip_build {
            (
                DeployStatus::BuildSkip,
                DeployTask::build(0, BuildTaskStatus::Skip, SKIP_MESSAGE),
            )
        } else {
            (DeployStatus::Pending, DeployTask::build(0, BuildTaskStatus::Pending, ""))
        };

        let (deploy, build, run) = match self.reusable_deploy(req)? {
            Some(mut deploy) => {
                req.apply_to(&mut deploy);
                deploy.status = status;
                deploy.message.clear();
                let deploy = self.ctx.store.update_deploy(&deploy)?;
                let mut build = build;
                build.deploy_id = deploy.id;
                let build = self.ctx.store.create_deploy_task(&build)?;
                let run = self.ctx.store.create_deploy_task(&DeployTask::run(deploy.id))?;
                debug!(deploy_id = deploy.id, svc_name = %deploy.svc_name, "reusing deploy");
                (deploy, build, run)
            }
            None => {
                let mut deploy = Deploy {
                    deploy_name: req.deploy_name.clone(),
                    deploy_type: req.deploy_type,
                    space_id: req.space_id,
                    model_id: req.model_id,
                    git_path: req.git_path.clone(),
                    git_branch: req.git_branch.clone(),
                    user_id: req.user_id,
                    user_name: req.user_name.clone(),
                    svc_name: self.names.generate(req.deploy_type.svc_prefix()),
                    status,
                    ..Default::default()
                };
                req.apply_to(&mut deploy);
                let (deploy, mut tasks) = self
                    .ctx
                    .store
                    .create_deploy_with_tasks(&deploy, vec![build, DeployTask::run(0)])?;
                let run = tasks.pop().ok_or_else(|| {
                    DeployerError::InvalidInput(format!("deploy {} was created without tasks", deploy.id))
                })?;
                let build = tasks.pop().ok_or_else(|| {
                    DeployerError::InvalidInput(format!("deploy {} was created without tasks", deploy.id))
                })?;
                (deploy, build, run)
            }
        };

        info!(
            deploy_id = deploy.id,
            deploy_type = %deploy.deploy_type,
            svc_name = %deploy.svc_name,
            build_task = build.id,
            run_task = run.id,
            skip_build,
            "deploy created"
        );
        self.dispatcher.dispatch(Some(&build), &run).await?;
        self.report(&deploy, build.id, LogStage::Build, "waiting_for_resource", "build task submitted");
        Ok(deploy.id)
    }

    /// Start a stopped deploy again with a fresh run task.
    pub async fn start_deploy(&self, deploy_id: DeployId) -> DeployerResult<()> {
        let mut deploy = self.load(deploy_id)?;
        self.ledger.check_order_detail(deploy.order_detail_id, deploy.id)?;

        deploy.status = DeployStatus::Pending;
        deploy.message.clear();
        let deploy = self.ctx.store.update_deploy(&deploy)?;
        let run = self.ctx.store.create_deploy_task(&DeployTask::run(deploy.id))?;
        info!(deploy_id, run_task = run.id, "deploy restarted");

        self.dispatcher.dispatch(None, &run).await?;
        self.report(&deploy, run.id, LogStage::Deploy, "waiting_for_resource", "deploy task submitted");
        Ok(())
    }

    /// Effective status: the runner's live view when it knows the service,
    /// the stored status otherwise.
    pub async fn status(&self, deploy_id: DeployId) -> DeployerResult<DeployStatusReport> {
        let deploy = self.load(deploy_id)?;
        let mut report = DeployStatusReport {
            deploy_id,
            svc_name: deploy.svc_name.clone(),
            code: deploy.status.code(),
            message: deploy.message.clone(),
            instances: Vec::new(),
        };
        if deploy.status == DeployStatus::Pending {
            return Ok(report);
        }

        let resp = match self.ctx.runner.exist(&self.service(&deploy)?).await {
            Ok(resp) => resp,
            // An unreachable runner reports the stored status rather than an error.
            Err(e) => {
                warn!(deploy_id, svc_name = %deploy.svc_name, error = %e, "service probe failed, using stored status");
                return Ok(report);
            }
        };
        if resp.code == RunStatusCode::UNKNOWN || resp.code == RunStatusCode::Stopped.code() {
            return Ok(report);
        }
        report.code = resp.code;
        if !resp.message.is_empty() {
            report.message = resp.message;
        }
        report.instances = resp.instances;
        Ok(report)
    }

    /// Build and run logs of the deploy's latest tasks. Run logs start at
    /// `since` when given, at the deploy's creation otherwise.
    pub fn logs(&self, deploy_id: DeployId, since: Option<&str>) -> DeployerResult<MultiLogReader> {
        let deploy = self.load(deploy_id)?;
        let tasks = self.ctx.store.get_deploy_tasks_of_deploy(deploy_id)?;
        let build_task = tasks.iter().rev().find(|t| t.phase.is_build());
        let run_task = tasks.iter().rev().find(|t| !t.phase.is_build());

        let build = match build_task {
            Some(task) => self
                .ctx
                .logs
                .read(deploy_id, LogStage::Build, task.created_at)
                .into_iter()
                .filter(|e| e.task_id == task.id)
                .collect(),
            None => Vec::new(),
        };

        let start = since.map_or(deploy.created_at, |s| parse_since_time(s, epoch_secs()));
        let run = match run_task {
            Some(task) => self
                .ctx
                .logs
                .read(deploy_id, LogStage::Deploy, start)
                .into_iter()
                .filter(|e| e.task_id == task.id)
                .collect(),
            None => Vec::new(),
        };
        Ok(MultiLogReader::new(build, run))
    }

    /// Run logs of one instance. An empty instance name matches all.
    pub fn instance_logs(
        &self,
        deploy_id: DeployId,
        instance: &str,
        since: Option<&str>,
    ) -> DeployerResult<MultiLogReader> {
        let deploy = self.load(deploy_id)?;
        let start = since.map_or(deploy.created_at, |s| parse_since_time(s, epoch_secs()));
        let run = self
            .ctx
            .logs
            .read(deploy_id, LogStage::Deploy, start)
            .into_iter()
            .filter(|e| instance.is_empty() || e.instance.as_deref() == Some(instance))
            .collect();
        Ok(MultiLogReader::new(Vec::new(), run))
    }

    /// Stop the service and release its reservation. A runner failure is
    /// logged; the deploy is marked stopped regardless.
    pub async fn stop(&self, deploy_id: DeployId) -> DeployerResult<()> {
        let mut deploy = self.load(deploy_id)?;
        if let Err(e) = self.ctx.runner.stop(&self.service(&deploy)?).await {
            error!(deploy_id, svc_name = %deploy.svc_name, error = %e, "failed to stop service");
        }
        deploy.status = DeployStatus::Stopped;
        deploy.message = "stopped".to_string();
        let deploy = self.ctx.store.update_deploy(&deploy)?;
        self.ledger.release(deploy.order_detail_id)?;
        info!(deploy_id, svc_name = %deploy.svc_name, "deploy stopped");
        Ok(())
    }

    /// Stop the deploy's latest build and cancel its task.
    pub async fn stop_build(&self, deploy_id: DeployId) -> DeployerResult<()> {
        let deploy = self.load(deploy_id)?;
        let tasks = self.ctx.store.get_deploy_tasks_of_deploy(deploy_id)?;
        let Some(mut task) = tasks.into_iter().rev().find(|t| t.phase.is_build()) else {
            return Err(DeployerError::InvalidInput(format!("deploy {deploy_id} has no build task")));
        };

        let (org, name) = split_path(&deploy.git_path)?;
        let req = ImageBuildStopRequest {
            org_name: org.to_string(),
            space_name: name.to_string(),
            deploy_id: deploy.id.to_string(),
            task_id: task.id.to_string(),
            cluster_id: deploy.cluster_id.clone(),
        };
        if let Err(e) = self.ctx.builder.stop(&req).await {
            error!(deploy_id, task_id = task.id, error = %e, "failed to stop build");
            return Err(e.into());
        }

        if !task.phase.is_terminal() {
            task.phase = task.phase.cancelled();
            task.message = "build stopped".to_string();
            self.ctx.store.update_deploy_task(&task)?;
        }
        info!(deploy_id, task_id = task.id, "build stopped");
        Ok(())
    }

    /// Remove the service for good.
    pub async fn purge(&self, deploy_id: DeployId) -> DeployerResult<()> {
        let mut deploy = self.load(deploy_id)?;
        if let Err(e) = self.ctx.runner.purge(&self.service(&deploy)?).await {
            error!(deploy_id, svc_name = %deploy.svc_name, error = %e, "failed to purge service");
            return Err(e.into());
        }
        deploy.status = DeployStatus::Deleted;
        let deploy = self.ctx.store.update_deploy(&deploy)?;
        self.ledger.release(deploy.order_detail_id)?;
        info!(deploy_id, "deploy purged");
        Ok(())
    }

    /// Whether the runner still has the service.
    pub async fn exist(&self, deploy_id: DeployId) -> DeployerResult<bool> {
        let deploy = self.load(deploy_id)?;
        let resp = self.ctx.runner.exist(&self.service(&deploy)?).await?;
        if resp.code == RunStatusCode::UNKNOWN {
            warn!(deploy_id, svc_name = %deploy.svc_name, "runner could not check service");
            return Err(DeployerError::ServiceCheckFailed(deploy_id));
        }
        Ok(resp.code != RunStatusCode::Stopped.code())
    }

    pub async fn get_replica(&self, deploy_id: DeployId) -> DeployerResult<ReplicaReport> {
        let deploy = self.load(deploy_id)?;
        let resp = self.ctx.runner.get_replica(&self.service(&deploy)?).await?;
        Ok(ReplicaReport {
            actual: resp.actual_replica,
            desired: resp.desired_replica,
            instances: resp.instances,
        })
    }

    /// Apply `update` to a deploy that is not running.
    pub fn update_deploy(&self, deploy_id: DeployId, update: &DeployUpdate) -> DeployerResult<Deploy> {
        let mut deploy = self.load(deploy_id)?;
        if deploy.status == DeployStatus::Running {
            return Err(DeployerError::DeployRunning(deploy_id));
        }

        if let Some(name) = &update.runtime_framework {
            let framework = self
                .ctx
                .store
                .find_enabled_runtime_framework(name)?
                .ok_or_else(|| DeployerError::InvalidInput(format!("runtime framework {name} is not available")))?;
            deploy.runtime_framework = framework.name;
            if framework.container_port != 0 {
                deploy.container_port = framework.container_port;
            }
        }

        match &update.hardware {
            Some(hardware) => {
                parse_hardware(hardware)?;
                deploy.hardware = hardware.clone();
            }
            None => {
                parse_hardware(&deploy.hardware)?;
            }
        }

        let min = update.min_replica.unwrap_or(i64::from(deploy.min_replica));
        let max = update.max_replica.unwrap_or(i64::from(deploy.max_replica));
        check_replicas(min, max)?;
        deploy.min_replica = replica_count(min)?;
        deploy.max_replica = replica_count(max)?;

        if let Some(name) = &update.deploy_name {
            deploy.deploy_name = name.clone();
        }
        if let Some(env) = &update.env {
            deploy.env = env.clone();
        }
        if let Some(variables) = &update.variables {
            deploy.variables = variables.clone();
        }
        if let Some(revision) = &update.revision {
            deploy.git_branch = revision.clone();
        }
        if let Some(cluster_id) = &update.cluster_id {
            deploy.cluster_id = cluster_id.clone();
        }
        if let Some(engine_args) = &update.engine_args {
            deploy.engine_args = engine_args.clone();
        }

        let deploy = self.ctx.store.update_deploy(&deploy)?;
        info!(deploy_id, "deploy updated");
        Ok(deploy)
    }

    /// Whether the deploy's current build task has finished successfully.
    pub fn build_succeeded(&self, deploy_id: DeployId) -> DeployerResult<bool> {
        let tasks = self.ctx.store.get_deploy_tasks_of_deploy(deploy_id)?;
        Ok(tasks
            .iter()
            .rev()
            .find(|t| t.phase.is_build())
            .is_some_and(|t| matches!(t.phase, TaskPhase::Build(s) if s.is_success())))
    }
}
