//! Build and run request construction.

use std::collections::BTreeMap;

use hubdeploy_core::{DeployConfig, DeployType, HardWare};
use hubdeploy_remote::{
    ImageBuildStatusRequest, ImageBuildStopRequest, ImageBuilderRequest, RunRequest,
    ServiceRequest,
};
use hubdeploy_state::{Deploy, DeployTask, EngineArg, RuntimeFramework};
use tracing::warn;

use crate::error::{SchedulerError, SchedulerResult};
use crate::repo::RepoInfo;

/// Annotation key carrying the deploy id on every run request.
pub const DEPLOY_ID_ANNOTATION: &str = "hub-deploy-id";

const PYTHON_VERSION: &str = "3.10";
const DEFAULT_CONTAINER_PORT: u16 = 8080;

/// Known space SDKs: name, default version, port.
const SDKS: &[(&str, &str, u16)] = &[
    ("gradio", "3.37.0", 7860),
    ("streamlit", "1.33.0", 8501),
    ("nginx", "1.25.0", 8000),
    ("mcp_server", "", 8000),
];

fn sdk_defaults(sdk: &str) -> Option<(&'static str, u16)> {
    SDKS.iter()
        .find(|(name, _, _)| *name == sdk)
        .map(|(_, version, port)| (*version, *port))
}

/// Parse a JSON object of strings. Empty input is an empty map.
pub fn json_map(raw: &str) -> SchedulerResult<BTreeMap<String, String>> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let value: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| SchedulerError::InvalidRequest(format!("not a JSON object: {e}")))?;
    Ok(value
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

// ── Build ──────────────────────────────────────────────────────────

pub fn build_request(repo: &RepoInfo, deploy: &Deploy, task: &DeployTask) -> ImageBuilderRequest {
    let sdk_version = if repo.sdk_version.is_empty() {
        let version = sdk_defaults(&repo.sdk).map(|(v, _)| v).unwrap_or_default();
        warn!(path = %repo.path, sdk = %repo.sdk, version, "using default sdk version");
        version.to_string()
    } else {
        repo.sdk_version.clone()
    };
    ImageBuilderRequest {
        org_name: repo.namespace.clone(),
        space_name: repo.name.clone(),
        hardware: deploy.hardware.clone(),
        python_version: PYTHON_VERSION.to_string(),
        sdk: repo.sdk.clone(),
        sdk_version,
        driver_version: repo.driver_version.clone(),
        space_url: repo.http_clone_url.clone(),
        git_ref: deploy.git_branch.clone(),
        user_id: deploy.user_name.clone(),
        git_access_token: deploy.secret_key.clone(),
        deploy_id: deploy.id.to_string(),
        cluster_id: deploy.cluster_id.clone(),
        last_commit_id: String::new(),
        task_id: task.id,
        factory_build: false,
    }
}

pub fn build_status_request(repo: &RepoInfo, deploy: &Deploy, task: &DeployTask) -> ImageBuildStatusRequest {
    ImageBuildStatusRequest {
        org_name: repo.namespace.clone(),
        space_name: repo.name.clone(),
        deploy_id: deploy.id,
        task_id: task.id,
        cluster_id: deploy.cluster_id.clone(),
    }
}

pub fn build_stop_request(repo: &RepoInfo, deploy: &Deploy, task_id: u64) -> ImageBuildStopRequest {
    ImageBuildStopRequest {
        org_name: repo.namespace.clone(),
        space_name: repo.name.clone(),
        deploy_id: deploy.id.to_string(),
        task_id: task_id.to_string(),
        cluster_id: deploy.cluster_id.clone(),
    }
}

// ── Run ────────────────────────────────────────────────────────────

/// Identifies the deploy's service on the runner.
pub fn service_request(repo: &RepoInfo, deploy: &Deploy) -> ServiceRequest {
    ServiceRequest {
        id: deploy.runner_target_id(),
        org_name: repo.namespace.clone(),
        repo_name: repo.name.clone(),
        cluster_id: deploy.cluster_id.clone(),
        svc_name: deploy.svc_name.clone(),
        deploy_type: deploy.deploy_type,
        user_id: deploy.user_id.to_string(),
        need_details: true,
    }
}

pub fn run_request(
    config: &DeployConfig,
    repo: &RepoInfo,
    deploy: &Deploy,
    task: &DeployTask,
    framework: Option<&RuntimeFramework>,
) -> SchedulerResult<RunRequest> {
    let hardware = HardWare::from_json(&deploy.hardware)
        .map_err(|e| SchedulerError::InvalidRequest(format!("hardware: {e}")))?;
    let mut annotation = json_map(&deploy.annotation)?;
    annotation.insert(DEPLOY_ID_ANNOTATION.to_string(), deploy.id.to_string());

    Ok(RunRequest {
        id: deploy.runner_target_id(),
        user_name: repo.user_name.clone(),
        org_name: repo.namespace.clone(),
        repo_name: repo.name.clone(),
        repo_type: Some(repo.repo_type),
        git_path: deploy.git_path.clone(),
        git_ref: deploy.git_branch.clone(),
        min_replica: deploy.min_replica,
        max_replica: deploy.max_replica,
        hardware,
        env: deploy_env(config, repo, deploy, framework),
        annotation,
        runtime_framework: deploy.runtime_framework.clone(),
        image_id: deploy.image_id.clone(),
        deploy_id: deploy.id,
        access_token: deploy.secret_key.clone(),
        cluster_id: deploy.cluster_id.clone(),
        svc_name: deploy.svc_name.clone(),
        deploy_type: deploy.deploy_type,
        user_id: deploy.user_id.to_string(),
        order_detail_id: deploy.order_detail_id,
        task_id: task.id,
        sdk: repo.sdk.clone(),
        container_port: container_port(repo, deploy, framework),
    })
}

fn container_port(repo: &RepoInfo, deploy: &Deploy, framework: Option<&RuntimeFramework>) -> u16 {
    if deploy.deploy_type.is_space() {
        if repo.sdk == "docker" {
            return deploy.container_port;
        }
        return sdk_defaults(&repo.sdk)
            .map(|(_, port)| port)
            .unwrap_or(DEFAULT_CONTAINER_PORT);
    }
    match framework {
        Some(f) if f.container_port != 0 => f.container_port,
        _ if deploy.container_port != 0 => deploy.container_port,
        _ => DEFAULT_CONTAINER_PORT,
    }
}

/// Render engine arguments from a framework's templates and the deploy's
/// chosen values. Templates without a chosen value are skipped.
pub fn engine_args(templates: &[EngineArg], values: &BTreeMap<String, String>) -> String {
    templates
        .iter()
        .filter_map(|arg| {
            let value = values.get(&arg.key)?;
            let format = if arg.format.is_empty() {
                "--{key} {value}"
            } else {
                arg.format.as_str()
            };
            Some(format.replace("{key}", &arg.key).replace("{value}", value))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Environment passed to the running service.
pub fn deploy_env(
    config: &DeployConfig,
    repo: &RepoInfo,
    deploy: &Deploy,
    framework: Option<&RuntimeFramework>,
) -> BTreeMap<String, String> {
    let mut env = json_map(&deploy.env).unwrap_or_else(|e| {
        warn!(deploy_id = deploy.id, error = %e, "deploy env is not a JSON object");
        BTreeMap::new()
    });
    match json_map(&deploy.variables) {
        Ok(vars) => env.extend(vars),
        Err(e) => warn!(deploy_id = deploy.id, error = %e, "deploy variables are not a JSON object"),
    }

    if let Some(framework) = framework {
        for (k, v) in &framework.env {
            env.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    if config.s3_internal {
        env.insert("S3_INTERNAL".to_string(), "true".to_string());
    }
    env.insert("REPO_ID".to_string(), repo.path.clone());
    env.insert("REVISION".to_string(), deploy.git_branch.clone());
    if !deploy.secret_key.is_empty() {
        env.insert("ACCESS_TOKEN".to_string(), deploy.secret_key.clone());
    }

    if let Some(framework) = framework.filter(|f| !f.engine_args.is_empty()) {
        let values = json_map(&deploy.engine_args).unwrap_or_else(|e| {
            warn!(deploy_id = deploy.id, error = %e, "engine args are not a JSON object");
            BTreeMap::new()
        });
        env.insert("ENGINE_ARGS".to_string(), engine_args(&framework.engine_args, &values));
    }

    env.insert(
        "PORT".to_string(),
        container_port(repo, deploy, framework).to_string(),
    );

    match deploy.deploy_type {
        DeployType::Inference | DeployType::Serverless => {
            env.insert("HF_ENDPOINT".to_string(), config.model_download_endpoint.clone());
            env.insert("HF_HUB_OFFLINE".to_string(), "1".to_string());
            env.insert("HF_TASK".to_string(), deploy.task.clone());
        }
        DeployType::Finetune => {
            env.insert("HF_ENDPOINT".to_string(), config.model_download_endpoint.clone());
        }
        DeployType::Space if repo.sdk == "docker" => {
            env.insert("HF_ENDPOINT".to_string(), config.model_download_endpoint.clone());
        }
        _ => {}
    }

    if config.public_root_domain.is_empty() && deploy.deploy_type.is_space() {
        let root = format!("/endpoint/{}", deploy.svc_name);
        env.insert("GRADIO_ROOT_PATH".to_string(), root.clone());
        env.insert("STREAMLIT_SERVER_BASE_URL_PATH".to_string(), root);
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubdeploy_core::RepoType;

    fn space_repo(sdk: &str) -> RepoInfo {
        RepoInfo {
            path: "acme/chat".to_string(),
            namespace: "acme".to_string(),
            name: "chat".to_string(),
            repo_type: RepoType::Space,
            sdk: sdk.to_string(),
            sdk_version: String::new(),
            driver_version: String::new(),
            http_clone_url: String::new(),
            space_id: Some(3),
            model_id: None,
            deploy_id: 8,
            user_name: "alice".to_string(),
        }
    }

    fn space_deploy() -> Deploy {
        Deploy {
            id: 8,
            space_id: Some(3),
            git_branch: "main".to_string(),
            svc_name: "u-abc".to_string(),
            hardware: r#"{"cpu":{"num":"2"},"memory":"4Gi"}"#.to_string(),
            env: r#"{"A":"1","B":"2"}"#.to_string(),
            variables: r#"{"B":"override","N":3}"#.to_string(),
            secret_key: "tok".to_string(),
            ..Default::default()
        }
    }

    fn model_deploy(deploy_type: DeployType) -> Deploy {
        Deploy {
            id: 12,
            model_id: Some(5),
            deploy_type,
            container_port: 8000,
            task: "text-generation".to_string(),
            engine_args: r#"{"max-model-len":"4096"}"#.to_string(),
            hardware: r#"{"memory":"16Gi"}"#.to_string(),
            ..Default::default()
        }
    }

    fn model_repo() -> RepoInfo {
        RepoInfo {
            repo_type: RepoType::Model,
            space_id: None,
            model_id: Some(5),
            sdk: String::new(),
            ..space_repo("")
        }
    }

    #[test]
    fn json_map_accepts_empty_and_stringifies() {
        assert!(json_map("").unwrap().is_empty());
        let map = json_map(r#"{"a":"x","b":2,"c":true}"#).unwrap();
        assert_eq!(map["a"], "x");
        assert_eq!(map["b"], "2");
        assert_eq!(map["c"], "true");
        assert!(json_map("[1]").is_err());
    }

    #[test]
    fn space_env_merges_variables_and_sets_port() {
        let config = DeployConfig::default();
        let env = deploy_env(&config, &space_repo("gradio"), &space_deploy(), None);
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "override");
        assert_eq!(env["N"], "3");
        assert_eq!(env["PORT"], "7860");
        assert_eq!(env["REPO_ID"], "acme/chat");
        assert_eq!(env["REVISION"], "main");
        assert_eq!(env["ACCESS_TOKEN"], "tok");
        assert_eq!(env["GRADIO_ROOT_PATH"], "/endpoint/u-abc");
        assert!(!env.contains_key("S3_INTERNAL"));
        assert!(!env.contains_key("HF_ENDPOINT"));
    }

    #[test]
    fn docker_space_uses_deploy_port() {
        let mut deploy = space_deploy();
        deploy.container_port = 9000;
        let env = deploy_env(&DeployConfig::default(), &space_repo("docker"), &deploy, None);
        assert_eq!(env["PORT"], "9000");
        assert!(env.contains_key("HF_ENDPOINT"));
    }

    #[test]
    fn public_domain_disables_root_paths() {
        let config = DeployConfig {
            public_root_domain: "apps.example.com".to_string(),
            s3_internal: true,
            ..Default::default()
        };
        let env = deploy_env(&config, &space_repo("streamlit"), &space_deploy(), None);
        assert_eq!(env["PORT"], "8501");
        assert_eq!(env["S3_INTERNAL"], "true");
        assert!(!env.contains_key("GRADIO_ROOT_PATH"));
    }

    #[test]
    fn inference_env_uses_framework() {
        let framework = RuntimeFramework {
            name: "vllm".to_string(),
            enabled: true,
            container_port: 8000,
            engine_args: vec![
                EngineArg {
                    key: "max-model-len".to_string(),
                    ..Default::default()
                },
                EngineArg {
                    key: "dtype".to_string(),
                    ..Default::default()
                },
            ],
            env: BTreeMap::from([("VLLM_LOG".to_string(), "info".to_string())]),
        };
        let config = DeployConfig::default();
        let env = deploy_env(&config, &model_repo(), &model_deploy(DeployType::Inference), Some(&framework));
        assert_eq!(env["ENGINE_ARGS"], "--max-model-len 4096");
        assert_eq!(env["HF_HUB_OFFLINE"], "1");
        assert_eq!(env["HF_TASK"], "text-generation");
        assert_eq!(env["HF_ENDPOINT"], config.model_download_endpoint);
        assert_eq!(env["PORT"], "8000");
        assert_eq!(env["VLLM_LOG"], "info");
        assert!(!env.contains_key("GRADIO_ROOT_PATH"));
    }

    #[test]
    fn finetune_env() {
        let env = deploy_env(
            &DeployConfig::default(),
            &model_repo(),
            &model_deploy(DeployType::Finetune),
            None,
        );
        assert!(env.contains_key("HF_ENDPOINT"));
        assert!(!env.contains_key("HF_HUB_OFFLINE"));
    }

    #[test]
    fn engine_args_custom_format() {
        let templates = vec![EngineArg {
            key: "tp".to_string(),
            value: String::new(),
            format: "--tensor-parallel-size={value}".to_string(),
        }];
        let values = BTreeMap::from([("tp".to_string(), "2".to_string())]);
        assert_eq!(engine_args(&templates, &values), "--tensor-parallel-size=2");
        assert_eq!(engine_args(&templates, &BTreeMap::new()), "");
    }

    #[test]
    fn run_request_carries_deploy_fields() {
        let deploy = space_deploy();
        let task = DeployTask::run(deploy.id);
        let req = run_request(&DeployConfig::default(), &space_repo("gradio"), &deploy, &task, None).unwrap();
        assert_eq!(req.id, 3);
        assert_eq!(req.deploy_id, 8);
        assert_eq!(req.svc_name, "u-abc");
        assert_eq!(req.annotation[DEPLOY_ID_ANNOTATION], "8");
        assert_eq!(req.container_port, 7860);
        assert_eq!(req.repo_type, Some(RepoType::Space));
    }

    #[test]
    fn run_request_rejects_bad_hardware() {
        let mut deploy = space_deploy();
        deploy.hardware = "not json".to_string();
        let task = DeployTask::run(deploy.id);
        assert!(run_request(&DeployConfig::default(), &space_repo("gradio"), &deploy, &task, None).is_err());
    }

    #[test]
    fn build_request_defaults_sdk_version() {
        let deploy = space_deploy();
        let task = DeployTask::build(deploy.id, hubdeploy_state::BuildTaskStatus::Pending, "");
        let req = build_request(&space_repo("gradio"), &deploy, &task);
        assert_eq!(req.sdk_version, "3.37.0");
        assert_eq!(req.org_name, "acme");
        assert_eq!(req.space_name, "chat");
        assert_eq!(req.deploy_id, "8");
    }
}
