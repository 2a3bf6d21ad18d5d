use std::time::Duration;

use wings_contract::RetryState;

/// Fibonacci backoff between drain cycles that leave records behind.
///
/// The n-th consecutive failure waits `fib(n) * step`, so the first retry
/// is immediate and the next ones wait 1, 1, 2, 3, 5 ... steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(step: Duration) -> Self {
        Self { step }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn delay_for(&self, failures: u32) -> Duration {
        let steps = u32::try_from(fibonacci(failures)).unwrap_or(u32::MAX);
        self.step.saturating_mul(steps)
    }

    /// Returns the delay for the current count and bumps the counter.
    pub fn increment_and_get_time(&self, state: &mut RetryState) -> Duration {
        let delay = self.delay_for(state.consecutive_failures);
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        delay
    }

    pub fn reset(&self, state: &mut RetryState) {
        state.consecutive_failures = 0;
    }
}

fn fibonacci(n: u32) -> u64 {
    let (mut current, mut next) = (0u64, 1u64);
    for _ in 0..n {
        if current == u64::MAX {
            break;
        }
        let sum = current.saturating_add(next);
        current = next;
        next = sum;
    }
    current
}
