//! Domain types for the hub deploy state store.
//!
//! Status enums serialize as their numeric wire codes so records stay
//! compatible with the runner and builder services that report them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use hubdeploy_core::{ClusterStatus, DeployType, HardWare, HardwareError, RepoType, ResourceStatus};

pub type DeployId = u64;
pub type TaskId = u64;

// ── Deploy status ──────────────────────────────────────────────────

/// Lifecycle of a deploy row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum DeployStatus {
    #[default]
    Pending,
    BuildInQueue,
    Building,
    BuildFailed,
    BuildSuccess,
    BuildSkip,
    Deploying,
    DeployFailed,
    Startup,
    Running,
    RunTimeError,
    Sleeping,
    Stopped,
    Deleted,
}

impl DeployStatus {
    pub fn code(self) -> i32 {
        match self {
            DeployStatus::Pending => 0,
            DeployStatus::BuildInQueue => 10,
            DeployStatus::Building => 11,
            DeployStatus::BuildFailed => 12,
            DeployStatus::BuildSuccess => 13,
            DeployStatus::BuildSkip => 14,
            DeployStatus::Deploying => 20,
            DeployStatus::DeployFailed => 21,
            DeployStatus::Startup => 22,
            DeployStatus::Running => 23,
            DeployStatus::RunTimeError => 24,
            DeployStatus::Sleeping => 25,
            DeployStatus::Stopped => 26,
            DeployStatus::Deleted => 27,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code {
            0 => DeployStatus::Pending,
            10 => DeployStatus::BuildInQueue,
            11 => DeployStatus::Building,
            12 => DeployStatus::BuildFailed,
            13 => DeployStatus::BuildSuccess,
            14 => DeployStatus::BuildSkip,
            20 => DeployStatus::Deploying,
            21 => DeployStatus::DeployFailed,
            22 => DeployStatus::Startup,
            23 => DeployStatus::Running,
            24 => DeployStatus::RunTimeError,
            25 => DeployStatus::Sleeping,
            26 => DeployStatus::Stopped,
            27 => DeployStatus::Deleted,
            _ => return None,
        };
        Some(status)
    }
}

impl TryFrom<i32> for DeployStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        DeployStatus::from_code(code).ok_or_else(|| format!("unknown deploy status code {code}"))
    }
}

impl From<DeployStatus> for i32 {
    fn from(status: DeployStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Task status ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum BuildTaskStatus {
    Pending,
    InProgress,
    Failed,
    Succeed,
    Skip,
    InQueue,
    Cancelled,
}

impl BuildTaskStatus {
    pub fn code(self) -> i32 {
        match self {
            BuildTaskStatus::Pending => 0,
            BuildTaskStatus::InProgress => 1,
            BuildTaskStatus::Failed => 2,
            BuildTaskStatus::Succeed => 3,
            BuildTaskStatus::Skip => 4,
            BuildTaskStatus::InQueue => 5,
            BuildTaskStatus::Cancelled => 99,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildTaskStatus::Failed
                | BuildTaskStatus::Succeed
                | BuildTaskStatus::Skip
                | BuildTaskStatus::Cancelled
        )
    }

    /// Terminal and the run task may proceed.
    pub fn is_success(self) -> bool {
        matches!(self, BuildTaskStatus::Succeed | BuildTaskStatus::Skip)
    }
}

impl TryFrom<i32> for BuildTaskStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => BuildTaskStatus::Pending,
            1 => BuildTaskStatus::InProgress,
            2 => BuildTaskStatus::Failed,
            3 => BuildTaskStatus::Succeed,
            4 => BuildTaskStatus::Skip,
            5 => BuildTaskStatus::InQueue,
            99 => BuildTaskStatus::Cancelled,
            _ => return Err(format!("unknown build task status code {code}")),
        })
    }
}

impl From<BuildTaskStatus> for i32 {
    fn from(status: BuildTaskStatus) -> Self {
        status.code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum RunTaskStatus {
    Pending,
    Deploying,
    Failed,
    StartUp,
    Running,
    RunTimeError,
    Cancelled,
}

impl RunTaskStatus {
    pub fn code(self) -> i32 {
        match self {
            RunTaskStatus::Pending => 0,
            RunTaskStatus::Deploying => 1,
            RunTaskStatus::Failed => 2,
            RunTaskStatus::StartUp => 3,
            RunTaskStatus::Running => 4,
            RunTaskStatus::RunTimeError => 5,
            RunTaskStatus::Cancelled => 99,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunTaskStatus::Failed
                | RunTaskStatus::Running
                | RunTaskStatus::RunTimeError
                | RunTaskStatus::Cancelled
        )
    }
}

impl TryFrom<i32> for RunTaskStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => RunTaskStatus::Pending,
            1 => RunTaskStatus::Deploying,
            2 => RunTaskStatus::Failed,
            3 => RunTaskStatus::StartUp,
            4 => RunTaskStatus::Running,
            5 => RunTaskStatus::RunTimeError,
            99 => RunTaskStatus::Cancelled,
            _ => return Err(format!("unknown run task status code {code}")),
        })
    }
}

impl From<RunTaskStatus> for i32 {
    fn from(status: RunTaskStatus) -> Self {
        status.code()
    }
}

/// Task kind and its status. The two status spaces never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "task_type", content = "status", rename_all = "snake_case")]
pub enum TaskPhase {
    Build(BuildTaskStatus),
    Run(RunTaskStatus),
}

impl TaskPhase {
    /// Wire task type: 0 for build, 1 for run.
    pub fn task_type(&self) -> u8 {
        match self {
            TaskPhase::Build(_) => 0,
            TaskPhase::Run(_) => 1,
        }
    }

    pub fn is_build(&self) -> bool {
        matches!(self, TaskPhase::Build(_))
    }

    pub fn status_code(&self) -> i32 {
        match self {
            TaskPhase::Build(s) => s.code(),
            TaskPhase::Run(s) => s.code(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            TaskPhase::Build(s) => s.is_terminal(),
            TaskPhase::Run(s) => s.is_terminal(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            TaskPhase::Build(BuildTaskStatus::Pending) | TaskPhase::Run(RunTaskStatus::Pending)
        )
    }

    /// Whether the FIFO cursor should pick this task up.
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            TaskPhase::Build(BuildTaskStatus::Pending | BuildTaskStatus::InProgress)
                | TaskPhase::Run(
                    RunTaskStatus::Pending | RunTaskStatus::Deploying | RunTaskStatus::StartUp
                )
        )
    }

    pub fn cancelled(&self) -> TaskPhase {
        match self {
            TaskPhase::Build(_) => TaskPhase::Build(BuildTaskStatus::Cancelled),
            TaskPhase::Run(_) => TaskPhase::Run(RunTaskStatus::Cancelled),
        }
    }

    pub fn failed(&self) -> TaskPhase {
        match self {
            TaskPhase::Build(_) => TaskPhase::Build(BuildTaskStatus::Failed),
            TaskPhase::Run(_) => TaskPhase::Run(RunTaskStatus::Failed),
        }
    }

    /// Deploy status that records a failure of this kind of task.
    pub fn failed_deploy_status(&self) -> DeployStatus {
        match self {
            TaskPhase::Build(_) => DeployStatus::BuildFailed,
            TaskPhase::Run(_) => DeployStatus::DeployFailed,
        }
    }
}

// ── Deploy ─────────────────────────────────────────────────────────

/// One logical deployment of a space or model repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deploy {
    pub id: DeployId,
    pub deploy_name: String,
    pub deploy_type: DeployType,
    /// Exactly one of `space_id` / `model_id` is set.
    pub space_id: Option<u64>,
    pub model_id: Option<u64>,
    /// `namespace/name` of the repository.
    pub git_path: String,
    pub git_branch: String,
    pub user_id: u64,
    pub user_name: String,
    /// Serialized [`HardWare`].
    pub hardware: String,
    /// JSON object of environment variables.
    #[serde(default)]
    pub env: String,
    /// JSON object of user variables, merged over `env`.
    #[serde(default)]
    pub variables: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub svc_name: String,
    #[serde(default)]
    pub endpoint: String,
    /// Reservation reference, 0 = none.
    #[serde(default)]
    pub order_detail_id: u64,
    pub status: DeployStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub container_port: u16,
    #[serde(default)]
    pub min_replica: u32,
    #[serde(default)]
    pub max_replica: u32,
    #[serde(default)]
    pub runtime_framework: String,
    /// JSON object of engine argument overrides.
    #[serde(default)]
    pub engine_args: String,
    /// Pipeline task for inference deploys, e.g. `text-generation`.
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub annotation: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Deploy {
    pub fn repo_type(&self) -> RepoType {
        if self.space_id.is_some() {
            RepoType::Space
        } else {
            RepoType::Model
        }
    }

    pub fn hardware(&self) -> Result<HardWare, HardwareError> {
        HardWare::from_json(&self.hardware)
    }

    /// Id the runner reports status under: the space id for spaces, the
    /// deploy id otherwise.
    pub fn runner_target_id(&self) -> u64 {
        match self.space_id {
            Some(space_id) if self.deploy_type.is_space() => space_id,
            _ => self.id,
        }
    }
}

// ── Deploy task ────────────────────────────────────────────────────

/// One unit of work belonging to a deploy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployTask {
    pub id: TaskId,
    pub deploy_id: DeployId,
    pub phase: TaskPhase,
    #[serde(default)]
    pub message: String,
    pub created_at: u64,
    pub updated_at: u64,
    /// When the run was handed to the image runner; 0 until then.
    #[serde(default)]
    pub submitted_at: u64,
}

impl DeployTask {
    pub fn build(deploy_id: DeployId, status: BuildTaskStatus, message: impl Into<String>) -> Self {
        Self::new(deploy_id, TaskPhase::Build(status), message)
    }

    pub fn run(deploy_id: DeployId) -> Self {
        Self::new(deploy_id, TaskPhase::Run(RunTaskStatus::Pending), "")
    }

    fn new(deploy_id: DeployId, phase: TaskPhase, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            deploy_id,
            phase,
            message: message.into(),
            created_at: 0,
            updated_at: 0,
            submitted_at: 0,
        }
    }

    /// Start of the deploy timeout window. Time spent waiting for the build
    /// does not count against it.
    pub fn deploy_started_at(&self) -> u64 {
        if self.submitted_at != 0 {
            self.submitted_at
        } else {
            self.created_at
        }
    }
}

// ── Reservations ───────────────────────────────────────────────────

/// Capacity reserved against an order detail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserResources {
    pub order_detail_id: u64,
    pub order_id: String,
    pub user_uid: String,
    pub cluster_id: String,
    /// Deploy currently holding the reservation, 0 = free.
    pub deploy_id: DeployId,
    pub xpu_num: i64,
    /// Accelerator model the reservation was bought for; empty matches any.
    #[serde(default)]
    pub xpu_model: String,
    pub start_time: u64,
    /// Epoch seconds, 0 = open-ended.
    pub end_time: u64,
}

impl UserResources {
    /// Reserved but not yet held by a running deploy.
    pub fn is_pending_reservation(&self, now: u64) -> bool {
        self.deploy_id == 0 && (self.end_time == 0 || self.end_time > now)
    }
}

// ── Cluster metadata ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub status: ClusterStatus,
    #[serde(default)]
    pub resource_status: ResourceStatus,
    /// Epoch seconds of the last heartbeat.
    pub updated_at: u64,
}

// ── Repositories ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub id: u64,
    /// `namespace/name`.
    pub path: String,
    pub sdk: String,
    #[serde(default)]
    pub sdk_version: String,
    #[serde(default)]
    pub driver_version: String,
    #[serde(default)]
    pub http_clone_url: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub variables: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: u64,
    pub path: String,
    #[serde(default)]
    pub http_clone_url: String,
}

/// One engine argument template, e.g. `{key: "max-model-len", format: "--{key} {value}"}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineArg {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub format: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeFramework {
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub container_port: u16,
    #[serde(default)]
    pub engine_args: Vec<EngineArg>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
