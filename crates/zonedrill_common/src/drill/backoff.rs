//! Poll pacing: exponential backoff with jitter, bounded by a deadline

use crate::config::PollSettings;
use std::time::Duration;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub base: Duration,
    pub factor: f64,
    pub jitter_percent: f64,
    pub max: Duration,
    /// Wall-clock bound on the whole wait
    pub deadline: Duration,
    pub max_ticks: Option<u32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::from_settings(&PollSettings::default())
    }
}

impl PollConfig {
    pub fn from_settings(settings: &PollSettings) -> Self {
        Self {
            base: settings.effective_base_interval(),
            factor: settings.effective_backoff_factor(),
            jitter_percent: settings.effective_jitter(),
            max: settings.effective_max_interval(),
            deadline: settings.effective_deadline(),
            max_ticks: settings.max_ticks,
        }
    }

    /// Wait before the tick following `tick` (0-based), without jitter
    pub fn base_delay(&self, tick: u32) -> Duration {
        let exp = tick.min(32) as i32;
        let millis = (self.base.as_millis() as f64 * self.factor.powi(exp))
            .min(self.max.as_millis() as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Calculate backoff duration with jitter
    pub fn delay(&self, tick: u32) -> Duration {
        use rand::Rng;

        let base = self.base_delay(tick).as_millis() as f64;
        if self.jitter_percent <= 0.0 || base <= 0.0 {
            return Duration::from_millis(base as u64);
        }

        // ±jitter_percent
        let jitter_range = base * self.jitter_percent;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }

    /// Whether the tick cap (if any) has been reached
    pub fn ticks_exhausted(&self, ticks: u32) -> bool {
        self.max_ticks.map_or(false, |cap| ticks >= cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PollConfig {
        PollConfig {
            base: Duration::from_millis(100),
            factor: 2.0,
            jitter_percent: 0.2,
            max: Duration::from_millis(1000),
            deadline: Duration::from_secs(60),
            max_ticks: Some(3),
        }
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let c = config();
        assert_eq!(c.base_delay(0), Duration::from_millis(100));
        assert_eq!(c.base_delay(1), Duration::from_millis(200));
        assert_eq!(c.base_delay(3), Duration::from_millis(800));
        assert_eq!(c.base_delay(4), Duration::from_millis(1000));
        assert_eq!(c.base_delay(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let c = config();
        for tick in 0..6 {
            let base = c.base_delay(tick).as_millis() as f64;
            for _ in 0..20 {
                let d = c.delay(tick).as_millis() as f64;
                assert!(d >= base * 0.8 - 1.0 && d <= base * 1.2 + 1.0);
            }
        }
    }

    #[test]
    fn test_tick_cap() {
        let c = config();
        assert!(!c.ticks_exhausted(2));
        assert!(c.ticks_exhausted(3));
        let uncapped = PollConfig { max_ticks: None, ..c };
        assert!(!uncapped.ticks_exhausted(u32::MAX));
    }

    #[test]
    fn test_from_default_settings() {
        let c = PollConfig::default();
        assert_eq!(c.base, Duration::from_secs(15));
        assert_eq!(c.max, Duration::from_secs(60));
        assert_eq!(c.deadline, Duration::from_secs(1800));
    }
}
