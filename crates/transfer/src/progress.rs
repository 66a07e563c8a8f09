use std::time::{Duration, Instant};

/// Default resampling interval for [`SpeedCalculator`].
const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Computes transfer speed from periodic samples of the uploaded byte count.
///
/// Speed is only recomputed once at least `interval` has elapsed since the
/// previous sample. In between, the last computed speed is reported, so it is
/// 0 only until the first full interval has passed.
#[derive(Debug, Clone)]
pub struct SpeedCalculator {
    interval: Duration,
    last_sample: Option<(Instant, u64)>,
    speed: f64,
}

impl SpeedCalculator {
    /// Creates a new calculator. `None` uses a one second interval.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval: interval.unwrap_or(DEFAULT_SAMPLE_INTERVAL),
            last_sample: None,
            speed: 0.0,
        }
    }

    /// Records the total uploaded byte count now and returns the current speed.
    pub fn record(&mut self, uploaded: u64) -> f64 {
        self.record_at(Instant::now(), uploaded)
    }

    /// Same as [`record`](Self::record) with an explicit clock reading.
    pub fn record_at(&mut self, now: Instant, uploaded: u64) -> f64 {
        match self.last_sample {
            None => self.last_sample = Some((now, uploaded)),
            Some((at, bytes)) => {
                let elapsed = now.saturating_duration_since(at);
                if elapsed >= self.interval && !elapsed.is_zero() {
                    let delta = uploaded.saturating_sub(bytes);
                    self.speed = delta as f64 / elapsed.as_secs_f64();
                    self.last_sample = Some((now, uploaded));
                }
            }
        }
        self.speed
    }

    /// Bytes per second as of the last completed sample.
    pub fn bytes_per_second(&self) -> f64 {
        self.speed
    }

    /// Drops the sampling anchor and the computed speed.
    ///
    /// Called after a pause so idle time is not averaged into the speed.
    pub fn reset(&mut self) {
        self.last_sample = None;
        self.speed = 0.0;
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Seconds needed to move `remaining_bytes` at `speed`; 0 when unknown.
pub fn estimate_remaining(remaining_bytes: u64, speed: f64) -> u64 {
    if speed <= 0.0 || !speed.is_finite() {
        return 0;
    }
    (remaining_bytes as f64 / speed).round() as u64
}

/// Upload progress as a percentage (0-100).
pub fn percentage(uploaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    uploaded as f64 / total as f64 * 100.0
}
