//! Redial backoff for dropped device connections.

use std::time::Duration;

use telestream_core::config::ReconnectConfig;

/// Exponential backoff: the delay doubles per attempt up to `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Redials allowed after the first connection (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub const fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before redial number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether redial number `attempt` (0-indexed) is allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_device_config() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert!(policy.max_attempts.is_none());
    }

    #[test]
    fn delay_doubles_then_caps() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<_> = (0..8).map(|a| policy.delay_for_attempt(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(60));
    }

    #[test]
    fn bounded_attempts() {
        let policy = ReconnectPolicy::from_config(&ReconnectConfig {
            max_attempts: Some(2),
            initial_delay_ms: 100,
            max_delay_ms: 250,
        });
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(250));
    }

    #[test]
    fn unlimited_attempts() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(u32::MAX));
    }
}
