//! Rollout timing configuration.

use std::time::Duration;

use confgrid_core::ControllerConfig;

/// How a rollout waits for the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutSettings {
    /// Time between registry checks while propagating.
    pub poll_interval: Duration,
    /// Give up waiting (TimedOut) after this long.
    pub deadline: Duration,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            deadline: Duration::from_secs(30),
        }
    }
}

impl RolloutSettings {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            poll_interval: config.rollout_poll_interval,
            deadline: config.rollout_deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_controller_config() {
        assert_eq!(
            RolloutSettings::from_config(&ControllerConfig::default()),
            RolloutSettings::default()
        );
    }
}
