//! Shared types used across hubdeploy crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// What a deploy runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployType {
    #[default]
    Space,
    Inference,
    Finetune,
    Serverless,
    Evaluation,
    Notebook,
}

impl DeployType {
    /// Label used in workflow ids.
    pub fn workflow_label(self) -> &'static str {
        match self {
            DeployType::Space => "space",
            DeployType::Inference => "model",
            DeployType::Finetune => "finetune",
            DeployType::Serverless => "serverless",
            DeployType::Evaluation => "evaluation",
            DeployType::Notebook => "notebook",
        }
    }

    /// Prefix for generated service names.
    pub fn svc_prefix(self) -> &'static str {
        match self {
            DeployType::Space => "u",
            DeployType::Inference => "i",
            DeployType::Finetune => "f",
            DeployType::Serverless => "s",
            DeployType::Evaluation => "e",
            DeployType::Notebook => "n",
        }
    }

    pub fn is_space(self) -> bool {
        self == DeployType::Space
    }
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.workflow_label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoType {
    Space,
    Model,
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoType::Space => f.write_str("space"),
            RepoType::Model => f.write_str("model"),
        }
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_is_labelled_model() {
        assert_eq!(DeployType::Inference.workflow_label(), "model");
        assert_eq!(DeployType::Space.to_string(), "space");
    }

    #[test]
    fn deploy_type_serializes_snake_case() {
        let json = serde_json::to_string(&DeployType::Serverless).unwrap();
        assert_eq!(json, "\"serverless\"");
    }

    #[test]
    fn epoch_secs_returns_reasonable_value() {
        assert!(epoch_secs() > 1_700_000_000);
    }
}
