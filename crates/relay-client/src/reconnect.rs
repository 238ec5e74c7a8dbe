//! Reconnection policy and backoff calculation.
//!
//! When the transport drops without the client or the server asking for it,
//! the client re-dials the server, redoes the engine handshake, and rejoins
//! its namespace. [`ReconnectPolicy`] decides whether that happens, how many
//! times, and how long to wait between attempts.

use std::time::Duration;

use rand::Rng;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay before the first attempt.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);
/// Default upper bound on the delay between attempts.
pub const DEFAULT_DELAY_MAX: Duration = Duration::from_secs(5);
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Automatic reconnection settings.
///
/// Disabled by default: a test driver usually wants a dropped connection to
/// surface as a closed event stream. [`ReconnectPolicy::enabled`] gives the
/// long-running client behaviour (unlimited attempts, 1s doubling to 5s).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Whether a dropped transport is re-dialed at all.
    pub enabled: bool,
    /// Attempts before giving up; `None` retries forever.
    pub attempts: Option<u32>,
    /// Delay before the first attempt; doubles on each further attempt.
    pub delay: Duration,
    /// Cap on the doubled delay.
    pub delay_max: Duration,
    /// Jitter applied symmetrically around the capped delay.
    pub randomization_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            attempts: None,
            delay: DEFAULT_DELAY,
            delay_max: DEFAULT_DELAY_MAX,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
        }
    }
}

impl ReconnectPolicy {
    /// Reconnect forever with the default backoff.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Never reconnect.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether attempt number `attempt` (1-based) is still allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        self.attempts.is_none_or(|max| attempt <= max)
    }

    /// Delay before attempt `attempt` (1-based), with jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(self, attempt, rand::rng().random::<f64>())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// `min(delay_max, delay * 2^(attempt-1)) * (1 + (random*2 - 1) * factor)`.
///
/// `random` is a value in `[0.0, 1.0)`; 0.5 yields the un-jittered delay.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay(policy: &ReconnectPolicy, attempt: u32, random: f64) -> Duration {
    let base = u64::try_from(policy.delay.as_millis()).unwrap_or(u64::MAX);
    let max = u64::try_from(policy.delay_max.as_millis()).unwrap_or(u64::MAX);
    let exponential = base.saturating_mul(1u64 << attempt.saturating_sub(1).min(31));
    let capped = exponential.min(max);

    let factor = policy.randomization_factor.clamp(0.0, 1.0);
    let jitter = 1.0 + (random * 2.0 - 1.0) * factor;
    Duration::from_millis(((capped as f64) * jitter).round().max(0.0) as u64)
}
