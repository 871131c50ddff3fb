use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connection manager tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// How often the background check polls the active transport.
    pub health_check_interval: Duration,
    /// Reconnect the lost transport without being asked.
    pub auto_reconnect: bool,
    /// Attempts per loss episode.
    pub max_reconnect_attempts: u32,
    /// Fixed pause before each attempt.
    pub reconnect_delay: Duration,
    /// Attempts used by [`crate::ConnectionManager::send`].
    pub default_send_attempts: u32,
}

impl ManagerConfig {
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_reconnect(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_delay = delay;
        self
    }

    pub fn with_send_attempts(mut self, attempts: u32) -> Self {
        self.default_send_attempts = attempts.max(1);
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            auto_reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            default_send_attempts: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ManagerConfig::default();
        assert_eq!(config.health_check_interval, Duration::from_secs(5));
        assert!(config.auto_reconnect);
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.default_send_attempts, 1);
    }

    #[test]
    fn send_attempts_never_drop_below_one() {
        assert_eq!(
            ManagerConfig::default()
                .with_send_attempts(0)
                .default_send_attempts,
            1
        );
    }
}
