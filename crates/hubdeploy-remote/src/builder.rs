//! Image builder client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RemoteError, RemoteResult};
use crate::http::JsonClient;

/// Build status codes reported by the image builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatusCode {
    Pending,
    InProgress,
    Failed,
    Succeeded,
}

impl BuildStatusCode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::InProgress),
            2 => Some(Self::Failed),
            3 => Some(Self::Succeeded),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Failed => 2,
            Self::Succeeded => 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageBuilderRequest {
    pub org_name: String,
    pub space_name: String,
    /// Hardware request JSON, passed through untouched.
    pub hardware: String,
    pub python_version: String,
    pub sdk: String,
    pub sdk_version: String,
    pub driver_version: String,
    pub space_url: String,
    pub git_ref: String,
    pub user_id: String,
    pub git_access_token: String,
    pub deploy_id: String,
    pub cluster_id: String,
    pub last_commit_id: String,
    pub task_id: u64,
    pub factory_build: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageBuildStatusRequest {
    pub org_name: String,
    pub space_name: String,
    pub deploy_id: u64,
    pub task_id: u64,
    pub cluster_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageBuildStatusResponse {
    pub code: i32,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub message: String,
}

impl ImageBuildStatusResponse {
    pub fn status(&self) -> Option<BuildStatusCode> {
        BuildStatusCode::from_code(self.code)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageBuildStopRequest {
    pub org_name: String,
    pub space_name: String,
    pub deploy_id: String,
    pub task_id: String,
    pub cluster_id: String,
}

/// Acknowledgement for build submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildResponse {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Submit a build. A non-zero response code is an error.
    async fn build(&self, req: &ImageBuilderRequest) -> RemoteResult<()>;

    async fn status(&self, req: &ImageBuildStatusRequest) -> RemoteResult<ImageBuildStatusResponse>;

    async fn stop(&self, req: &ImageBuildStopRequest) -> RemoteResult<()>;
}

/// HTTP client for the image builder service.
#[derive(Debug, Clone)]
pub struct HttpImageBuilder {
    client: JsonClient,
}

impl HttpImageBuilder {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> RemoteResult<Self> {
        Ok(Self {
            client: JsonClient::new(endpoint, api_key, timeout)?,
        })
    }
}

#[async_trait]
impl ImageBuilder for HttpImageBuilder {
    async fn build(&self, req: &ImageBuilderRequest) -> RemoteResult<()> {
        let resp: BuildResponse = self.client.post_json("/api/v1/imagebuilder/builder", req).await?;
        if resp.code != 0 {
            warn!(deploy_id = %req.deploy_id, code = resp.code, message = %resp.message, "build rejected");
            return Err(RemoteError::Rejected {
                code: resp.code,
                message: resp.message,
            });
        }
        debug!(deploy_id = %req.deploy_id, task_id = req.task_id, "build submitted");
        Ok(())
    }

    async fn status(&self, req: &ImageBuildStatusRequest) -> RemoteResult<ImageBuildStatusResponse> {
        self.client.post_json("/api/v1/imagebuilder/status", req).await
    }

    async fn stop(&self, req: &ImageBuildStopRequest) -> RemoteResult<()> {
        self.client.post_unit("/api/v1/imagebuilder/stop", req).await
    }
}
