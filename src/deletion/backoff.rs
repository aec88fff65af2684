use std::time::Duration;


/// Pure exponential backoff: `base * 2^(attempt-1)`, capped. Attempt 0 is the
/// first try and has no delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self { base_delay, max_delay }
    }


    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }


    pub fn schedule(&self, retries: u32) -> Vec<Duration> {
        (1..=retries).map(|attempt| self.delay_for_attempt(attempt)).collect()
    }
}


/// Spreads `delay` by +/- `factor`, using `sample` in `[0.0, 1.0)`.
pub fn apply_jitter(delay: Duration, factor: f64, sample: f64) -> Duration {
    let factor = factor.clamp(0.0, 1.0);
    let base_ms = delay.as_millis() as f64;
    let offset = (sample.clamp(0.0, 1.0) * 2.0 - 1.0) * base_ms * factor;
    Duration::from_millis((base_ms + offset).max(0.0) as u64)
}


pub fn jittered(delay: Duration, factor: f64) -> Duration {
    apply_jitter(delay, factor, fastrand::f64())
}
