//! Deploy progress log entries.
//!
//! Runners and activities report human-readable progress lines per deploy;
//! the deployer reads them back merged across the build and run stages.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::types::epoch_secs;

/// Default number of entries a [`MemoryLogCollector`] keeps.
const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStage {
    Build,
    Deploy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub deploy_id: u64,
    pub task_id: u64,
    pub stage: LogStage,
    /// Short step name, e.g. `build_in_progress`.
    pub step: String,
    pub message: String,
    /// Set for lines emitted by a specific running instance.
    #[serde(default)]
    pub instance: Option<String>,
    pub timestamp: u64,
}

impl LogEntry {
    pub fn new(
        deploy_id: u64,
        task_id: u64,
        stage: LogStage,
        step: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            deploy_id,
            task_id,
            stage,
            step: step.into(),
            message: message.into(),
            instance: None,
            timestamp: epoch_secs(),
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

/// Sink and source for deploy log entries.
pub trait LogCollector: Send + Sync {
    fn report(&self, entry: LogEntry);

    /// Entries for a deploy and stage at or after `since` (epoch seconds),
    /// oldest first.
    fn read(&self, deploy_id: u64, stage: LogStage, since: u64) -> Vec<LogEntry>;
}

/// Bounded in-process collector. Oldest entries are evicted first.
pub struct MemoryLogCollector {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl MemoryLogCollector {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLogCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl LogCollector for MemoryLogCollector {
    fn report(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    fn read(&self, deploy_id: u64, stage: LogStage, since: u64) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|e| e.deploy_id == deploy_id && e.stage == stage && e.timestamp >= since)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_filters_by_deploy_and_stage() {
        let logs = MemoryLogCollector::new();
        logs.report(LogEntry::new(1, 10, LogStage::Build, "build_in_progress", "building"));
        logs.report(LogEntry::new(1, 11, LogStage::Deploy, "deploying", "starting"));
        logs.report(LogEntry::new(2, 20, LogStage::Build, "build_in_progress", "other"));

        let build = logs.read(1, LogStage::Build, 0);
        assert_eq!(build.len(), 1);
        assert_eq!(build[0].message, "building");
        assert_eq!(logs.read(1, LogStage::Deploy, 0).len(), 1);
    }

    #[test]
    fn read_respects_since() {
        let logs = MemoryLogCollector::new();
        let mut old = LogEntry::new(1, 10, LogStage::Build, "s", "old");
        old.timestamp = 100;
        logs.report(old);
        let mut new = LogEntry::new(1, 10, LogStage::Build, "s", "new");
        new.timestamp = 200;
        logs.report(new);

        let recent = logs.read(1, LogStage::Build, 150);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "new");
    }

    #[test]
    fn capacity_evicts_oldest() {
        let logs = MemoryLogCollector::with_capacity(2);
        for i in 0..3 {
            logs.report(LogEntry::new(1, i, LogStage::Deploy, "s", format!("line {i}")));
        }
        assert_eq!(logs.len(), 2);
        let lines = logs.read(1, LogStage::Deploy, 0);
        assert_eq!(lines[0].message, "line 1");
    }
}
