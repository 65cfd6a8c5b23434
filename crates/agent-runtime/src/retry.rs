//! Retry policy for gateway calls
//!
//! Exponential backoff capped at `max_delay`, plus up to 10% random jitter.

use std::time::Duration;

use agent_core::error::GatewayError;
use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Total attempts including the first
    pub const fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry `n` (1-based), without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1_u32 << shift)
            .min(self.max_delay)
    }

    /// Delay before retry `n` (1-based), with jitter
    pub fn delay(&self, retry: u32) -> Duration {
        let backoff = self.backoff(retry);
        let spread = u64::try_from(backoff.as_millis() / 10).unwrap_or(u64::MAX);
        if spread == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

/// Whether a failed attempt may succeed if repeated
pub fn is_transient(error: &GatewayError) -> bool {
    match error {
        GatewayError::Timeout(_) | GatewayError::Transport(_) | GatewayError::MalformedResponse(_) => true,
        GatewayError::ProviderError { status, .. } => {
            matches!(status.as_deref(), Some("408" | "429"))
        }
    }
}
