//! hubdeploy.toml configuration parser.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    pub deploy: DeployConfig,
    pub scheduler: SchedulerConfig,
    pub workflow: WorkflowConfig,
    pub remote: RemoteConfig,
    pub server: ServerConfig,
}

/// Which component drives build and run tasks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    #[default]
    Fifo,
    Workflow,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeployConfig {
    pub space_deploy_timeout_min: u64,
    pub model_deploy_timeout_min: u64,
    pub build_timeout_min: u64,
    /// Cluster heartbeat period reported by runners. A cluster is stale
    /// after twice this many seconds without an update.
    pub heartbeat_time_in_sec: u64,
    pub model_download_endpoint: String,
    /// Empty means spaces are served under a path prefix.
    pub public_root_domain: String,
    pub s3_internal: bool,
    pub driver: DriverKind,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            space_deploy_timeout_min: 30,
            model_deploy_timeout_min: 60,
            build_timeout_min: 30,
            heartbeat_time_in_sec: 120,
            model_download_endpoint: "https://hub.example.com".to_string(),
            public_root_domain: String::new(),
            s3_internal: false,
            driver: DriverKind::Fifo,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub queue_capacity: usize,
    pub task_timeout_min: u64,
    pub idle_sleep_secs: u64,
    pub build_poll_secs: u64,
    pub deploy_poll_secs: u64,
    pub image_wait_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            task_timeout_min: 30,
            idle_sleep_secs: 5,
            build_poll_secs: 10,
            deploy_poll_secs: 10,
            image_wait_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    pub heartbeat_ms: u64,
    pub status_check_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    /// Start-to-close bound on a single activity attempt.
    pub activity_timeout_min: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 1_000,
            status_check_ms: 5_000,
            retry_max_attempts: 3,
            retry_initial_ms: 200,
            retry_max_ms: 2_000,
            activity_timeout_min: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub builder_endpoint: String,
    pub runner_endpoint: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            builder_endpoint: "http://127.0.0.1:8082".to_string(),
            runner_endpoint: "http://127.0.0.1:8082".to_string(),
            api_key: String::new(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8090".to_string(),
            data_dir: PathBuf::from("/var/lib/hubdeploy"),
        }
    }
}

impl HubConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl DeployConfig {
    /// Force-cancel threshold for a run task of the given repo kind.
    pub fn deploy_timeout(&self, is_space: bool) -> Duration {
        let minutes = if is_space {
            self.space_deploy_timeout_min
        } else {
            self.model_deploy_timeout_min
        };
        Duration::from_secs(minutes * 60)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_min * 60)
    }

    pub fn heartbeat_timeout_secs(&self) -> u64 {
        self.heartbeat_time_in_sec * 2
    }
}

impl SchedulerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_min * 60)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_secs(self.idle_sleep_secs)
    }
}

impl WorkflowConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn status_check(&self) -> Duration {
        Duration::from_millis(self.status_check_ms)
    }

    pub fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.activity_timeout_min * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = HubConfig::from_toml_str("").unwrap();
        assert_eq!(config, HubConfig::default());
        assert_eq!(config.scheduler.queue_capacity, 100);
        assert_eq!(config.deploy.driver, DriverKind::Fifo);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let toml_str = r#"
[deploy]
space_deploy_timeout_min = 5
driver = "workflow"

[remote]
api_key = "secret"
"#;
        let config = HubConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.deploy.space_deploy_timeout_min, 5);
        assert_eq!(config.deploy.model_deploy_timeout_min, 60);
        assert_eq!(config.deploy.driver, DriverKind::Workflow);
        assert_eq!(config.remote.api_key, "secret");
        assert_eq!(config.remote.request_timeout_secs, 30);
    }

    #[test]
    fn timeouts_pick_repo_kind() {
        let deploy = DeployConfig {
            space_deploy_timeout_min: 2,
            model_deploy_timeout_min: 7,
            ..Default::default()
        };
        assert_eq!(deploy.deploy_timeout(true), Duration::from_secs(120));
        assert_eq!(deploy.deploy_timeout(false), Duration::from_secs(420));
        assert_eq!(deploy.heartbeat_timeout_secs(), 240);
    }

    #[test]
    fn from_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hubdeploy.toml");
        let mut config = HubConfig::default();
        config.scheduler.idle_sleep_secs = 1;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = HubConfig::from_file(&path).unwrap();
        assert_eq!(loaded.scheduler.idle_sleep_secs, 1);
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let err = HubConfig::from_toml_str("[deploy]\ndriver = \"cron\"\n");
        assert!(err.is_err());
    }
}
