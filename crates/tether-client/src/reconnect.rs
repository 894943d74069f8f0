//! Reconnect backoff.

use std::time::Duration;

use tether_settings::ReconnectSettings;

/// When and how often a dropped transport is reopened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all.
    pub enabled: bool,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up. `0` means never.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectSettings::default())
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            enabled: settings.enabled,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_attempts: settings.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before the next attempt, after `failures` consecutive failed
    /// attempts. `None` once the policy gives up.
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        if self.max_attempts > 0 && failures >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(failures.min(16));
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            max_attempts,
        }
    }

    #[test]
    fn doubles_until_ceiling() {
        let p = policy(0);
        let delays: Vec<_> = (0..6).map(|n| p.next_delay(n).unwrap().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn unlimited_attempts_never_give_up() {
        assert_eq!(policy(0).next_delay(10_000), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let p = policy(3);
        assert!(p.next_delay(2).is_some());
        assert!(p.next_delay(3).is_none());
    }

    #[test]
    fn disabled_never_retries() {
        assert!(ReconnectPolicy::disabled().next_delay(0).is_none());
    }

    #[test]
    fn from_settings() {
        let settings = ReconnectSettings {
            enabled: true,
            initial_delay_ms: 50,
            max_delay_ms: 400,
            max_attempts: 7,
        };
        let p = ReconnectPolicy::from(&settings);
        assert_eq!(p.initial_delay, Duration::from_millis(50));
        assert_eq!(p.max_delay, Duration::from_millis(400));
        assert_eq!(p.max_attempts, 7);
    }
}
