use std::time::Duration;

use hubdeploy_core::HubConfig;

/// Timing knobs for the scheduler and its runners.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    pub queue_capacity: usize,
    /// Upper bound on a single runner's execution.
    pub task_timeout: Duration,
    /// Pause taken by the sleep task when nothing is schedulable.
    pub idle_sleep: Duration,
    pub build_poll: Duration,
    pub deploy_poll: Duration,
    /// Pause between checks while a run task waits for its image.
    pub image_wait: Duration,
    pub space_deploy_timeout: Duration,
    pub model_deploy_timeout: Duration,
}

impl RunnerSettings {
    pub fn from_config(config: &HubConfig) -> Self {
        let s = &config.scheduler;
        Self {
            queue_capacity: s.queue_capacity.max(1),
            task_timeout: s.task_timeout(),
            idle_sleep: s.idle_sleep(),
            build_poll: Duration::from_secs(s.build_poll_secs),
            deploy_poll: Duration::from_secs(s.deploy_poll_secs),
            image_wait: Duration::from_secs(s.image_wait_secs),
            space_deploy_timeout: config.deploy.deploy_timeout(true),
            model_deploy_timeout: config.deploy.deploy_timeout(false),
        }
    }

    pub fn deploy_timeout(&self, is_space: bool) -> Duration {
        if is_space {
            self.space_deploy_timeout
        } else {
            self.model_deploy_timeout
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&HubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_config() {
        let settings = RunnerSettings::default();
        assert_eq!(settings.queue_capacity, 100);
        assert_eq!(settings.task_timeout, Duration::from_secs(30 * 60));
        assert_eq!(settings.deploy_timeout(true), Duration::from_secs(30 * 60));
        assert_eq!(settings.deploy_timeout(false), Duration::from_secs(60 * 60));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut config = HubConfig::default();
        config.scheduler.queue_capacity = 0;
        assert_eq!(RunnerSettings::from_config(&config).queue_capacity, 1);
    }
}
