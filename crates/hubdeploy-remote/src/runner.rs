//! Image runner client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use hubdeploy_core::{ClusterResponse, DeployType, HardWare, RepoType};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RemoteResult;
use crate::http::JsonClient;

/// Service status codes reported by the image runner. The numeric values
/// are shared with the deploy status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatusCode {
    Pending,
    Deploying,
    DeployFailed,
    Startup,
    Running,
    RunTimeError,
    Sleeping,
    Stopped,
}

impl RunStatusCode {
    /// Code the runner uses when it cannot tell what state a service is in.
    pub const UNKNOWN: i32 = -1;

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            20 => Some(Self::Deploying),
            21 => Some(Self::DeployFailed),
            22 => Some(Self::Startup),
            23 => Some(Self::Running),
            24 => Some(Self::RunTimeError),
            25 => Some(Self::Sleeping),
            26 => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::Deploying => 20,
            Self::DeployFailed => 21,
            Self::Startup => 22,
            Self::Running => 23,
            Self::RunTimeError => 24,
            Self::Sleeping => 25,
            Self::Stopped => 26,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Space id for spaces, deploy id otherwise.
    pub id: u64,
    pub user_name: String,
    pub org_name: String,
    pub repo_name: String,
    pub repo_type: Option<RepoType>,
    pub git_path: String,
    pub git_ref: String,
    pub min_replica: u32,
    pub max_replica: u32,
    pub hardware: HardWare,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub annotation: BTreeMap<String, String>,
    pub runtime_framework: String,
    pub image_id: String,
    pub deploy_id: u64,
    pub access_token: String,
    pub cluster_id: String,
    pub svc_name: String,
    pub deploy_type: DeployType,
    pub user_id: String,
    pub order_detail_id: u64,
    pub task_id: u64,
    pub sdk: String,
    pub container_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    #[serde(default)]
    pub deploy_id: u64,
    #[serde(default)]
    pub code: i32,
    /// Name of the service the runner started.
    #[serde(default)]
    pub message: String,
}

/// Identifies one service on one cluster. Used by stop, purge, exist and
/// status calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: u64,
    pub org_name: String,
    pub repo_name: String,
    pub cluster_id: String,
    pub svc_name: String,
    #[serde(default)]
    pub deploy_type: DeployType,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub need_details: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub deploy_id: u64,
    #[serde(default)]
    pub user_id: String,
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "url")]
    pub endpoint: String,
    #[serde(default, rename = "instance")]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub replica: u32,
    #[serde(default)]
    pub actual_replica: u32,
    #[serde(default)]
    pub desired_replica: u32,
    #[serde(default)]
    pub reason: String,
}

impl StatusResponse {
    pub fn status(&self) -> Option<RunStatusCode> {
        RunStatusCode::from_code(self.code)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaResponse {
    #[serde(default)]
    pub deploy_id: u64,
    #[serde(default)]
    pub actual_replica: u32,
    #[serde(default)]
    pub desired_replica: u32,
    #[serde(default, rename = "instance")]
    pub instances: Vec<Instance>,
}

#[async_trait]
pub trait ImageRunner: Send + Sync {
    /// Start a service. Returns the service name.
    async fn run(&self, req: &RunRequest) -> RemoteResult<String>;

    async fn status(&self, req: &ServiceRequest) -> RemoteResult<StatusResponse>;

    async fn stop(&self, req: &ServiceRequest) -> RemoteResult<()>;

    async fn purge(&self, req: &ServiceRequest) -> RemoteResult<()>;

    async fn exist(&self, req: &ServiceRequest) -> RemoteResult<StatusResponse>;

    async fn get_replica(&self, req: &ServiceRequest) -> RemoteResult<ReplicaResponse>;

    async fn list_cluster(&self) -> RemoteResult<Vec<ClusterResponse>>;

    async fn get_cluster_by_id(&self, cluster_id: &str) -> RemoteResult<ClusterResponse>;
}

/// HTTP client for the image runner service.
#[derive(Debug, Clone)]
pub struct HttpImageRunner {
    client: JsonClient,
}

impl HttpImageRunner {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> RemoteResult<Self> {
        Ok(Self {
            client: JsonClient::new(endpoint, api_key, timeout)?,
        })
    }

    fn service_path(svc_name: &str, action: &str) -> String {
        format!("/api/v1/service/{svc_name}/{action}")
    }
}

#[async_trait]
impl ImageRunner for HttpImageRunner {
    async fn run(&self, req: &RunRequest) -> RemoteResult<String> {
        let path = Self::service_path(&req.svc_name, "run");
        let resp: RunResponse = self.client.post_json(&path, req).await?;
        debug!(svc_name = %req.svc_name, deploy_id = req.deploy_id, code = resp.code, "run submitted");
        Ok(req.svc_name.clone())
    }

    async fn status(&self, req: &ServiceRequest) -> RemoteResult<StatusResponse> {
        let path = Self::service_path(&req.svc_name, "status");
        self.client.post_json(&path, req).await
    }

    async fn stop(&self, req: &ServiceRequest) -> RemoteResult<()> {
        let path = Self::service_path(&req.svc_name, "stop");
        self.client.post_unit(&path, req).await
    }

    async fn purge(&self, req: &ServiceRequest) -> RemoteResult<()> {
        let path = Self::service_path(&req.svc_name, "purge");
        self.client.delete_unit(&path, req).await
    }

    async fn exist(&self, req: &ServiceRequest) -> RemoteResult<StatusResponse> {
        let path = Self::service_path(&req.svc_name, "get");
        self.client.post_json(&path, req).await
    }

    async fn get_replica(&self, req: &ServiceRequest) -> RemoteResult<ReplicaResponse> {
        let path = Self::service_path(&req.svc_name, "replica");
        self.client.post_json(&path, req).await
    }

    async fn list_cluster(&self) -> RemoteResult<Vec<ClusterResponse>> {
        self.client.get_json("/api/v1/cluster").await
    }

    async fn get_cluster_by_id(&self, cluster_id: &str) -> RemoteResult<ClusterResponse> {
        self.client.get_json(&format!("/api/v1/cluster/{cluster_id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use hubdeploy_core::NodeResourceInfo;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn runner(base: &str) -> HttpImageRunner {
        HttpImageRunner::new(base, None, Duration::from_secs(2)).unwrap()
    }

    fn service(svc: &str) -> ServiceRequest {
        ServiceRequest {
            id: 1,
            cluster_id: "c1".to_string(),
            svc_name: svc.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn run_status_codes_share_deploy_numbering() {
        assert_eq!(RunStatusCode::from_code(23), Some(RunStatusCode::Running));
        assert_eq!(RunStatusCode::from_code(RunStatusCode::UNKNOWN), None);
        assert_eq!(RunStatusCode::Stopped.code(), 26);
    }

    #[test]
    fn status_response_uses_wire_names() {
        let resp: StatusResponse = serde_json::from_str(
            r#"{"deploy_id":4,"code":23,"url":"http://svc","instance":[{"name":"pod-a","status":"Running"}]}"#,
        )
        .unwrap();
        assert_eq!(resp.endpoint, "http://svc");
        assert_eq!(resp.instances.len(), 1);
        assert_eq!(resp.status(), Some(RunStatusCode::Running));
    }

    #[tokio::test]
    async fn run_posts_to_service_path() {
        let app = Router::new().route(
            "/api/v1/service/{svc}/run",
            post(|Path(svc): Path<String>, Json(req): Json<RunRequest>| async move {
                assert_eq!(svc, req.svc_name);
                Json(RunResponse {
                    deploy_id: req.deploy_id,
                    code: 0,
                    message: svc,
                })
            }),
        );
        let base = serve(app).await;

        let req = RunRequest {
            svc_name: "u-abc".to_string(),
            deploy_id: 9,
            image_id: "img:1".to_string(),
            ..Default::default()
        };
        assert_eq!(runner(&base).run(&req).await.unwrap(), "u-abc");
    }

    #[tokio::test]
    async fn status_and_replica() {
        let app = Router::new()
            .route(
                "/api/v1/service/{svc}/status",
                post(|| async {
                    Json(StatusResponse {
                        deploy_id: 3,
                        code: 22,
                        ..Default::default()
                    })
                }),
            )
            .route(
                "/api/v1/service/{svc}/replica",
                post(|| async {
                    Json(ReplicaResponse {
                        actual_replica: 1,
                        desired_replica: 2,
                        instances: vec![Instance {
                            name: "pod-a".to_string(),
                            status: "Running".to_string(),
                        }],
                        ..Default::default()
                    })
                }),
            );
        let base = serve(app).await;
        let client = runner(&base);

        let status = client.status(&service("u-abc")).await.unwrap();
        assert_eq!(status.status(), Some(RunStatusCode::Startup));
        assert_eq!(status.deploy_id, 3);

        let replica = client.get_replica(&service("u-abc")).await.unwrap();
        assert_eq!((replica.actual_replica, replica.desired_replica), (1, 2));
        assert_eq!(replica.instances[0].name, "pod-a");
    }

    #[tokio::test]
    async fn stop_purge_and_missing_service() {
        let app = Router::new()
            .route("/api/v1/service/{svc}/stop", post(|| async { StatusCode::OK }))
            .route("/api/v1/service/{svc}/purge", delete(|| async { StatusCode::OK }))
            .route(
                "/api/v1/service/{svc}/get",
                post(|| async { (StatusCode::NOT_FOUND, "no such service") }),
            );
        let base = serve(app).await;
        let client = runner(&base);

        client.stop(&service("u-abc")).await.unwrap();
        client.purge(&service("u-abc")).await.unwrap();
        let err = client.exist(&service("u-abc")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn cluster_queries() {
        let app = Router::new()
            .route(
                "/api/v1/cluster",
                get(|| async {
                    Json(vec![ClusterResponse {
                        cluster_id: "c1".to_string(),
                        ..Default::default()
                    }])
                }),
            )
            .route(
                "/api/v1/cluster/{id}",
                get(|Path(id): Path<String>| async move {
                    Json(ClusterResponse {
                        cluster_id: id,
                        nodes: vec![NodeResourceInfo {
                            node_name: "n1".to_string(),
                            ..Default::default()
                        }],
                        ..Default::default()
                    })
                }),
            );
        let base = serve(app).await;
        let client = runner(&base);

        let all = client.list_cluster().await.unwrap();
        assert_eq!(all.len(), 1);
        let one = client.get_cluster_by_id("c9").await.unwrap();
        assert_eq!(one.cluster_id, "c9");
        assert_eq!(one.nodes[0].node_name, "n1");
    }

    #[tokio::test]
    async fn slow_runner_times_out() {
        let app = Router::new().route(
            "/api/v1/cluster",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(Vec::<ClusterResponse>::new())
            }),
        );
        let base = serve(app).await;
        let client = HttpImageRunner::new(&base, None, Duration::from_millis(100)).unwrap();

        let err = client.list_cluster().await.unwrap_err();
        assert!(matches!(err, RemoteError::Timeout(_)));
    }
}
