//! Repository resolution for deploy tasks.

use hubdeploy_core::RepoType;
use hubdeploy_state::{Deploy, StateStore};
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};

/// What a runner needs to know about the repository behind a deploy.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoInfo {
    /// `namespace/name`.
    pub path: String,
    pub namespace: String,
    pub name: String,
    pub repo_type: RepoType,
    pub sdk: String,
    pub sdk_version: String,
    pub driver_version: String,
    pub http_clone_url: String,
    pub space_id: Option<u64>,
    pub model_id: Option<u64>,
    pub deploy_id: u64,
    pub user_name: String,
}

impl RepoInfo {
    fn new(path: &str, repo_type: RepoType, deploy: &Deploy) -> SchedulerResult<Self> {
        let (namespace, name) = split_path(path)?;
        Ok(Self {
            path: path.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            repo_type,
            sdk: String::new(),
            sdk_version: String::new(),
            driver_version: String::new(),
            http_clone_url: String::new(),
            space_id: None,
            model_id: None,
            deploy_id: deploy.id,
            user_name: deploy.user_name.clone(),
        })
    }
}

/// Split `namespace/name`.
pub fn split_path(path: &str) -> SchedulerResult<(&str, &str)> {
    match path.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((ns, name))
        }
        _ => Err(SchedulerError::InvalidRequest(format!(
            "repository path {path:?} is not namespace/name"
        ))),
    }
}

/// Look up the space or model a deploy targets. `Ok(None)` means the
/// repository no longer exists.
pub fn resolve_repo(store: &StateStore, deploy: &Deploy) -> SchedulerResult<Option<RepoInfo>> {
    if let Some(space_id) = deploy.space_id {
        let Some(space) = store.get_space(space_id)? else {
            debug!(deploy_id = deploy.id, space_id, "space not found");
            return Ok(None);
        };
        let mut repo = RepoInfo::new(&space.path, RepoType::Space, deploy)?;
        repo.sdk = space.sdk;
        repo.sdk_version = space.sdk_version;
        repo.driver_version = space.driver_version;
        repo.http_clone_url = space.http_clone_url;
        repo.space_id = Some(space.id);
        return Ok(Some(repo));
    }

    if let Some(model_id) = deploy.model_id {
        let Some(model) = store.get_model(model_id)? else {
            debug!(deploy_id = deploy.id, model_id, "model not found");
            return Ok(None);
        };
        let mut repo = RepoInfo::new(&model.path, RepoType::Model, deploy)?;
        repo.http_clone_url = model.http_clone_url;
        repo.model_id = Some(model.id);
        return Ok(Some(repo));
    }

    Err(SchedulerError::InvalidRequest(format!(
        "deploy {} targets neither a space nor a model",
        deploy.id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubdeploy_state::{Model, Space};

    #[test]
    fn split_path_requires_two_segments() {
        assert_eq!(split_path("acme/demo").unwrap(), ("acme", "demo"));
        assert!(split_path("demo").is_err());
        assert!(split_path("acme/").is_err());
        assert!(split_path("/demo").is_err());
        assert!(split_path("a/b/c").is_err());
    }

    #[test]
    fn resolves_space() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_space(&Space {
                id: 3,
                path: "acme/chat".to_string(),
                sdk: "gradio".to_string(),
                http_clone_url: "https://git.example.com/acme/chat.git".to_string(),
                ..Default::default()
            })
            .unwrap();
        let deploy = Deploy {
            id: 8,
            space_id: Some(3),
            user_name: "alice".to_string(),
            ..Default::default()
        };

        let repo = resolve_repo(&store, &deploy).unwrap().unwrap();
        assert_eq!(repo.namespace, "acme");
        assert_eq!(repo.name, "chat");
        assert_eq!(repo.sdk, "gradio");
        assert_eq!(repo.repo_type, RepoType::Space);
        assert_eq!(repo.space_id, Some(3));
        assert_eq!(repo.user_name, "alice");
    }

    #[test]
    fn resolves_model_and_reports_missing() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_model(&Model {
                id: 5,
                path: "acme/llm".to_string(),
                ..Default::default()
            })
            .unwrap();

        let deploy = Deploy {
            id: 9,
            model_id: Some(5),
            ..Default::default()
        };
        let repo = resolve_repo(&store, &deploy).unwrap().unwrap();
        assert_eq!(repo.repo_type, RepoType::Model);
        assert_eq!(repo.model_id, Some(5));

        let missing = Deploy {
            id: 10,
            model_id: Some(6),
            ..Default::default()
        };
        assert!(resolve_repo(&store, &missing).unwrap().is_none());
    }

    #[test]
    fn deploy_without_target_is_invalid() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(resolve_repo(&store, &Deploy::default()).is_err());
    }
}
