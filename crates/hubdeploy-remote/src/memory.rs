//! Scripted in-process builder and runner.
//!
//! Both replay a queue of status responses, then keep returning the last
//! one. Every request they receive is recorded so callers can assert on
//! what was sent. Used by the daemon's local mode and by tests across the
//! workspace.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use hubdeploy_core::ClusterResponse;

use crate::builder::{
    BuildStatusCode, ImageBuildStatusRequest, ImageBuildStatusResponse, ImageBuildStopRequest,
    ImageBuilder, ImageBuilderRequest,
};
use crate::error::{RemoteError, RemoteResult};
use crate::runner::{
    ImageRunner, ReplicaResponse, RunRequest, RunStatusCode, ServiceRequest, StatusResponse,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn unreachable_remote() -> RemoteError {
    RemoteError::Transport {
        url: "memory://".to_string(),
        message: "scripted failure".to_string(),
    }
}

/// Pops the next scripted value, keeping the last one sticky.
fn replay<T: Clone>(script: &mut VecDeque<T>, fallback: &T) -> T {
    if script.len() > 1 {
        script.pop_front().unwrap_or_else(|| fallback.clone())
    } else {
        script.front().cloned().unwrap_or_else(|| fallback.clone())
    }
}

// ── Builder ────────────────────────────────────────────────────────

#[derive(Default)]
struct BuilderState {
    statuses: VecDeque<ImageBuildStatusResponse>,
    reject: Option<(i32, String)>,
    failing_status_calls: usize,
    builds: Vec<ImageBuilderRequest>,
    status_calls: usize,
    stops: Vec<ImageBuildStopRequest>,
}

#[derive(Default)]
pub struct MemoryImageBuilder {
    state: Mutex<BuilderState>,
}

impl MemoryImageBuilder {
    /// A builder whose builds succeed immediately with `image_id`.
    pub fn succeeding(image_id: &str) -> Self {
        let builder = Self::default();
        builder.push_status(BuildStatusCode::Succeeded, image_id, "");
        builder
    }

    pub fn push_status(&self, code: BuildStatusCode, image_id: &str, message: &str) {
        lock(&self.state).statuses.push_back(ImageBuildStatusResponse {
            code: code.code(),
            image_id: image_id.to_string(),
            message: message.to_string(),
        });
    }

    pub fn push_raw_status(&self, code: i32) {
        lock(&self.state).statuses.push_back(ImageBuildStatusResponse {
            code,
            ..Default::default()
        });
    }

    /// Answer build submissions with a non-zero code.
    pub fn reject_builds(&self, code: i32, message: &str) {
        lock(&self.state).reject = Some((code, message.to_string()));
    }

    /// Make the next `n` status calls fail at the transport level.
    pub fn fail_status_calls(&self, n: usize) {
        lock(&self.state).failing_status_calls = n;
    }

    pub fn builds(&self) -> Vec<ImageBuilderRequest> {
        lock(&self.state).builds.clone()
    }

    pub fn stops(&self) -> Vec<ImageBuildStopRequest> {
        lock(&self.state).stops.clone()
    }

    pub fn status_calls(&self) -> usize {
        lock(&self.state).status_calls
    }
}

#[async_trait]
impl ImageBuilder for MemoryImageBuilder {
    async fn build(&self, req: &ImageBuilderRequest) -> RemoteResult<()> {
        let mut state = lock(&self.state);
        state.builds.push(req.clone());
        match &state.reject {
            Some((code, message)) => Err(RemoteError::Rejected {
                code: *code,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn status(&self, _req: &ImageBuildStatusRequest) -> RemoteResult<ImageBuildStatusResponse> {
        let mut state = lock(&self.state);
        state.status_calls += 1;
        if state.failing_status_calls > 0 {
            state.failing_status_calls -= 1;
            return Err(unreachable_remote());
        }
        let pending = ImageBuildStatusResponse::default();
        Ok(replay(&mut state.statuses, &pending))
    }

    async fn stop(&self, req: &ImageBuildStopRequest) -> RemoteResult<()> {
        lock(&self.state).stops.push(req.clone());
        Ok(())
    }
}

// ── Runner ─────────────────────────────────────────────────────────

#[derive(Default)]
struct RunnerState {
    statuses: VecDeque<StatusResponse>,
    exist: Option<StatusResponse>,
    replica: ReplicaResponse,
    clusters: Vec<ClusterResponse>,
    fail_runs: bool,
    failing_status_calls: usize,
    runs: Vec<RunRequest>,
    stops: Vec<ServiceRequest>,
    purges: Vec<ServiceRequest>,
}

#[derive(Default)]
pub struct MemoryImageRunner {
    state: Mutex<RunnerState>,
}

impl MemoryImageRunner {
    /// A runner whose services report running at `endpoint` right away.
    pub fn running(endpoint: &str) -> Self {
        let runner = Self::default();
        runner.push_status(RunStatusCode::Running, endpoint);
        runner
    }

    pub fn push_status(&self, code: RunStatusCode, message: &str) {
        let resp = StatusResponse {
            code: code.code(),
            message: message.to_string(),
            endpoint: if code == RunStatusCode::Running {
                message.to_string()
            } else {
                String::new()
            },
            ..Default::default()
        };
        lock(&self.state).statuses.push_back(resp);
    }

    pub fn push_response(&self, resp: StatusResponse) {
        lock(&self.state).statuses.push_back(resp);
    }

    /// Fixed answer for `exist`. Without one, `exist` mirrors `status`.
    pub fn set_exist(&self, resp: StatusResponse) {
        lock(&self.state).exist = Some(resp);
    }

    pub fn set_replica(&self, resp: ReplicaResponse) {
        lock(&self.state).replica = resp;
    }

    pub fn set_clusters(&self, clusters: Vec<ClusterResponse>) {
        lock(&self.state).clusters = clusters;
    }

    pub fn fail_runs(&self) {
        lock(&self.state).fail_runs = true;
    }

    pub fn fail_status_calls(&self, n: usize) {
        lock(&self.state).failing_status_calls = n;
    }

    pub fn runs(&self) -> Vec<RunRequest> {
        lock(&self.state).runs.clone()
    }

    pub fn stops(&self) -> Vec<ServiceRequest> {
        lock(&self.state).stops.clone()
    }

    pub fn purges(&self) -> Vec<ServiceRequest> {
        lock(&self.state).purges.clone()
    }
}

#[async_trait]
impl ImageRunner for MemoryImageRunner {
    async fn run(&self, req: &RunRequest) -> RemoteResult<String> {
        let mut state = lock(&self.state);
        if state.fail_runs {
            return Err(unreachable_remote());
        }
        state.runs.push(req.clone());
        Ok(req.svc_name.clone())
    }

    async fn status(&self, _req: &ServiceRequest) -> RemoteResult<StatusResponse> {
        let mut state = lock(&self.state);
        if state.failing_status_calls > 0 {
            state.failing_status_calls -= 1;
            return Err(unreachable_remote());
        }
        let deploying = StatusResponse {
            code: RunStatusCode::Deploying.code(),
            ..Default::default()
        };
        Ok(replay(&mut state.statuses, &deploying))
    }

    async fn stop(&self, req: &ServiceRequest) -> RemoteResult<()> {
        lock(&self.state).stops.push(req.clone());
        Ok(())
    }

    async fn purge(&self, req: &ServiceRequest) -> RemoteResult<()> {
        lock(&self.state).purges.push(req.clone());
        Ok(())
    }

    async fn exist(&self, req: &ServiceRequest) -> RemoteResult<StatusResponse> {
        let fixed = lock(&self.state).exist.clone();
        match fixed {
            Some(resp) => Ok(resp),
            None => self.status(req).await,
        }
    }

    async fn get_replica(&self, _req: &ServiceRequest) -> RemoteResult<ReplicaResponse> {
        Ok(lock(&self.state).replica.clone())
    }

    async fn list_cluster(&self) -> RemoteResult<Vec<ClusterResponse>> {
        Ok(lock(&self.state).clusters.clone())
    }

    async fn get_cluster_by_id(&self, cluster_id: &str) -> RemoteResult<ClusterResponse> {
        lock(&self.state)
            .clusters
            .iter()
            .find(|c| c.cluster_id == cluster_id)
            .cloned()
            .ok_or_else(|| RemoteError::Status {
                url: format!("memory:///api/v1/cluster/{cluster_id}"),
                status: 404,
                body: "cluster not found".to_string(),
            })
    }
}
