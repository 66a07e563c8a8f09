use std::time::Duration;

use rand::Rng;

/// Bounded backoff schedule for transient upload failures.
///
/// Attempt `n` (1-based) waits `delays[n - 1]`; once the schedule is
/// exhausted the failure is final.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
    /// Fraction of each delay applied as ± random jitter.
    jitter: f64,
}

impl Default for RetryPolicy {
    /// 0 s, 3 s, 5 s, 10 s, 20 s without jitter.
    fn default() -> Self {
        Self::from_schedule(
            [0, 3_000, 5_000, 10_000, 20_000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
        )
    }
}

impl RetryPolicy {
    /// Uses an explicit list of delays; its length is the attempt budget.
    pub fn from_schedule(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            jitter: 0.0,
        }
    }

    /// Adds ±`fraction` jitter to every delay (clamped to 0..=1).
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// Number of retries allowed before a failure becomes final.
    pub fn max_attempts(&self) -> u32 {
        self.delays.len() as u32
    }

    /// Delay before retry `attempt` (1-based), or `None` when exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        let base = *self.delays.get(attempt as usize - 1)?;
        if self.jitter == 0.0 || base.is_zero() {
            return Some(base);
        }
        let offset: f64 = rand::thread_rng().gen_range(-1.0..1.0);
        let secs = base.as_secs_f64() * (1.0 + self.jitter * offset);
        Some(Duration::from_secs_f64(secs.max(0.0)))
    }
}
