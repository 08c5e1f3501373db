use std::time::Duration;

use crate::config::PollerConfig;

/// Delays between status checks: a leading list, then a steady interval,
/// truncated so the total never exceeds the maximum wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSchedule {
    leading: Vec<Duration>,
    steady: Duration,
    max_wait: Duration,
}

impl PollSchedule {
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            leading: config
                .schedule_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            steady: Duration::from_secs(config.steady_interval_secs.max(1)),
            max_wait: config.max_wait(),
        }
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Delay before check number `poll` (0-based), ignoring the cap.
    pub fn interval(&self, poll: usize) -> Duration {
        self.leading.get(poll).copied().unwrap_or(self.steady)
    }

    /// Every delay up to the cap. The last one is shortened so a final check
    /// lands exactly on the maximum wait.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut elapsed = Duration::ZERO;
        (0..).map_while(move |poll| {
            if elapsed >= self.max_wait {
                return None;
            }
            let next = self.interval(poll).min(self.max_wait - elapsed);
            elapsed += next;
            Some(next)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn default_schedule_backs_off_then_goes_hourly() {
        let schedule = PollSchedule::new(&PollerConfig::default());
        let delays: Vec<Duration> = schedule.delays().take(6).collect();
        assert_eq!(delays, secs(&[60, 120, 300, 900, 3_600, 3_600]));
    }

    #[test]
    fn total_wait_is_capped() {
        let schedule = PollSchedule::new(&PollerConfig::default());
        let total: Duration = schedule.delays().sum();
        assert_eq!(total, Duration::from_secs(48 * 60 * 60));
    }

    #[test]
    fn last_delay_is_truncated() {
        let schedule = PollSchedule::new(&PollerConfig {
            schedule_secs: vec![10, 20],
            steady_interval_secs: 30,
            max_wait_secs: 45,
        });
        assert_eq!(schedule.delays().collect::<Vec<_>>(), secs(&[10, 20, 15]));
    }
}
