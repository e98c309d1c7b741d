use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff between attempts to apply a decision.
#[derive(Clone, Debug)]
pub struct Backoff {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Each delay is scaled by a random factor in `1 ± jitter`.
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl Backoff {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// The delays to wait before each retry. Yields one fewer item than
    /// `max_attempts`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let retries = self.max_attempts.max(1) - 1;
        let max = self.max_delay.as_secs_f64();
        (0..retries).map(move |n| {
            let base = (self.initial_delay.as_secs_f64() * self.multiplier.powi(n as i32)).min(max);
            let scale = if self.jitter > 0.0 {
                rand::thread_rng().gen_range((1.0 - self.jitter)..(1.0 + self.jitter))
            } else {
                1.0
            };
            Duration::from_secs_f64((base * scale).max(0.0))
        })
    }
}
