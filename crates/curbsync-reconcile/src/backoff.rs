use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after a failed attempt: `base * 2^(n-1)` for 1-based
    /// attempt numbers.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Explicit retry control flow: every attempt either succeeds, moves on to
/// the next attempt, or exhausts the policy. Retries are strictly sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting(u32),
    Succeeded,
    Exhausted,
}

impl RetryState {
    pub fn first() -> Self {
        Self::Attempting(1)
    }

    pub fn advance(self, policy: &BackoffPolicy, succeeded: bool) -> Self {
        match self {
            Self::Attempting(_) if succeeded => Self::Succeeded,
            Self::Attempting(attempt) if attempt >= policy.max_attempts => Self::Exhausted,
            Self::Attempting(attempt) => Self::Attempting(attempt + 1),
            terminal => terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }
}
