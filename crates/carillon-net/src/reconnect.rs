//! Retry timing and the reconnection state machine.
//!
//! [`RetryPolicy`] is the shared backoff description (attempt ceiling plus
//! delay curve). The transport uses it for reconnects and as the attempt
//! ceiling of queued outbound sends. [`ReconnectionPolicy`] owns the
//! [`ConnectionState`] and decides what happens after each connect outcome.

use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use carillon_shared::constants::{
    DEFAULT_RECONNECT_BASE_MS, DEFAULT_RECONNECT_MAX_ATTEMPTS, DEFAULT_RECONNECT_MAX_MS,
};
use carillon_shared::types::ConnectionState;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Growth curve of the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Backoff::Fixed),
            "linear" => Ok(Backoff::Linear),
            "exponential" | "exp" => Ok(Backoff::Exponential),
            other => Err(format!("unknown backoff strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated; reaching it stops retrying.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Fraction of the delay that may be randomly shaved off (0.0 - 1.0).
    /// Only settable through [`with_jitter`](Self::with_jitter).
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            backoff: Backoff::Exponential,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Deterministic policy (no jitter).
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter: 0.0,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Whether another attempt may follow `failures` consecutive failures.
    pub fn allows(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let n = attempt.max(1);
        let raw = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(n),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(n - 1)),
        };
        let capped = raw.min(self.max_delay);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter > 0.0 {
            let factor = rand::thread_rng().gen_range((1.0 - jitter)..=1.0);
            capped.mul_f64(factor)
        } else {
            capped
        }
    }
}

// ---------------------------------------------------------------------------
// Reconnection state machine
// ---------------------------------------------------------------------------

/// What the transport should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Open a new connection now.
    Connect,
    /// A connection is already open or being established.
    Join,
    /// Schedule the next attempt.
    RetryAfter(Duration),
    /// Attempt ceiling reached; state is now terminal.
    GiveUp { attempts: u32 },
    /// Outcome arrived while no session is desired.
    Ignore,
}

#[derive(Debug, Clone)]
pub struct ReconnectionPolicy {
    retry: RetryPolicy,
    failures: u32,
    state: ConnectionState,
}

impl ReconnectionPolicy {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            failures: 0,
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures since the last successful connect.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Explicit connect request. Leaving `Failed` starts a fresh cycle.
    pub fn request_connect(&mut self) -> Decision {
        match self.state {
            ConnectionState::Idle | ConnectionState::Failed { .. } => {
                self.failures = 0;
                self.state = ConnectionState::Connecting;
                Decision::Connect
            }
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting { .. } => Decision::Join,
        }
    }

    pub fn on_connected(&mut self) {
        self.failures = 0;
        self.state = ConnectionState::Connected;
    }

    /// A connect attempt failed or an established link dropped.
    pub fn on_failure(&mut self) -> Decision {
        if matches!(
            self.state,
            ConnectionState::Idle | ConnectionState::Failed { .. }
        ) {
            return Decision::Ignore;
        }

        self.failures += 1;
        if self.retry.allows(self.failures) {
            let delay = self.retry.delay_for(self.failures);
            self.state = ConnectionState::Reconnecting {
                attempt: self.failures,
            };
            debug!(attempt = self.failures, delay_ms = delay.as_millis() as u64, "Retry scheduled");
            Decision::RetryAfter(delay)
        } else {
            self.state = ConnectionState::Failed {
                attempts: self.failures,
            };
            Decision::GiveUp {
                attempts: self.failures,
            }
        }
    }

    /// Session no longer desired (teardown, logout, identity switch).
    pub fn reset(&mut self) {
        self.failures = 0;
        self.state = ConnectionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_curves() {
        let base = Duration::from_millis(100);
        let fixed = RetryPolicy::new(5, base).with_backoff(Backoff::Fixed);
        let linear = RetryPolicy::new(5, base).with_backoff(Backoff::Linear);
        let exp = RetryPolicy::new(5, base)
            .with_backoff(Backoff::Exponential)
            .with_max_delay(Duration::from_millis(500));

        assert_eq!(fixed.delay_for(4), base);
        assert_eq!(linear.delay_for(3), Duration::from_millis(300));
        assert_eq!(exp.delay_for(1), Duration::from_millis(100));
        assert_eq!(exp.delay_for(3), Duration::from_millis(400));
        assert_eq!(exp.delay_for(4), Duration::from_millis(500));
        assert_eq!(exp.delay_for(60), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000))
            .with_backoff(Backoff::Fixed)
            .with_jitter(0.5);
        for _ in 0..50 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_jitter_is_clamped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000))
            .with_backoff(Backoff::Fixed)
            .with_jitter(3.0);
        assert_eq!(policy.jitter(), 1.0);
        for _ in 0..50 {
            assert!(policy.delay_for(1) <= Duration::from_millis(1000));
        }
        assert_eq!(RetryPolicy::new(5, Duration::ZERO).with_jitter(-1.0).jitter(), 0.0);
    }

    #[test]
    fn test_backoff_parse() {
        assert_eq!("Linear".parse::<Backoff>().unwrap(), Backoff::Linear);
        assert_eq!("exp".parse::<Backoff>().unwrap(), Backoff::Exponential);
        assert!("random".parse::<Backoff>().is_err());
    }

    #[test]
    fn test_failures_increase_until_terminal() {
        let mut policy = ReconnectionPolicy::new(RetryPolicy::new(3, Duration::from_secs(1)));
        assert_eq!(policy.request_connect(), Decision::Connect);
        assert_eq!(policy.state(), ConnectionState::Connecting);

        assert!(matches!(policy.on_failure(), Decision::RetryAfter(_)));
        assert_eq!(policy.state(), ConnectionState::Reconnecting { attempt: 1 });
        assert!(matches!(policy.on_failure(), Decision::RetryAfter(_)));
        assert_eq!(policy.state(), ConnectionState::Reconnecting { attempt: 2 });

        assert_eq!(policy.on_failure(), Decision::GiveUp { attempts: 3 });
        assert_eq!(policy.state(), ConnectionState::Failed { attempts: 3 });

        // Terminal: further outcomes are ignored until an explicit connect.
        assert_eq!(policy.on_failure(), Decision::Ignore);
        assert_eq!(policy.failures(), 3);
        assert_eq!(policy.request_connect(), Decision::Connect);
        assert_eq!(policy.failures(), 0);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut policy = ReconnectionPolicy::new(RetryPolicy::new(5, Duration::from_secs(1)));
        policy.request_connect();
        policy.on_failure();
        policy.on_failure();
        assert_eq!(policy.failures(), 2);

        policy.on_connected();
        assert_eq!(policy.failures(), 0);
        assert_eq!(policy.request_connect(), Decision::Join);

        // A drop after success starts again from attempt 1.
        assert!(matches!(policy.on_failure(), Decision::RetryAfter(_)));
        assert_eq!(policy.state(), ConnectionState::Reconnecting { attempt: 1 });
    }

    #[test]
    fn test_reset_ignores_late_failures() {
        let mut policy = ReconnectionPolicy::new(RetryPolicy::default());
        policy.request_connect();
        policy.reset();
        assert_eq!(policy.state(), ConnectionState::Idle);
        assert_eq!(policy.on_failure(), Decision::Ignore);
    }
}
