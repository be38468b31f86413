use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Succeeded,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Attempting { attempt: 1 },
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn succeed(&mut self) -> RetryState {
        self.state = RetryState::Succeeded;
        self.state
    }

    pub fn fail(&mut self, retryable: bool) -> RetryState {
        self.state = match self.state {
            RetryState::Attempting { attempt }
                if retryable && attempt < self.policy.max_attempts =>
            {
                RetryState::Backoff {
                    attempt,
                    delay: self.policy.delay_after(attempt),
                }
            }
            _ => RetryState::Exhausted,
        };
        self.state
    }

    pub fn resume(&mut self) -> RetryState {
        if let RetryState::Backoff { attempt, .. } = self.state {
            self.state = RetryState::Attempting {
                attempt: attempt + 1,
            };
        }
        self.state
    }
}

/// Runs `operation` under `policy`. Errors for which `is_retryable` is
/// false, and the error of the final attempt, are returned unchanged.
pub fn retry_with<T, E, Op, Retryable, Sleep>(
    policy: RetryPolicy,
    mut operation: Op,
    is_retryable: Retryable,
    mut sleep: Sleep,
) -> Result<T, E>
where
    E: std::fmt::Display,
    Op: FnMut(u32) -> Result<T, E>,
    Retryable: Fn(&E) -> bool,
    Sleep: FnMut(Duration),
{
    let mut machine = RetryMachine::new(policy);

    loop {
        let attempt = match machine.state() {
            RetryState::Attempting { attempt } => attempt,
            _ => 1,
        };

        let error = match operation(attempt) {
            Ok(value) => {
                machine.succeed();
                return Ok(value);
            }
            Err(error) => error,
        };

        match machine.fail(is_retryable(&error)) {
            RetryState::Backoff { attempt, delay } => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "retryable failure, backing off"
                );
                sleep(delay);
                machine.resume();
            }
            _ => return Err(error),
        }
    }
}
