//! Reconnect policy: exponential backoff with jitter, bounded attempts.

use std::time::Duration;

use rand::Rng;
use shiftwire_shared::{CLOSE_AUTH_REJECTED, CLOSE_NORMAL, CLOSE_PAUSED, CLOSE_TOKEN_ROTATED};

/// Close codes that never trigger an automatic reconnect.
pub const NON_RETRYABLE_CLOSE_CODES: [u16; 4] = [
    CLOSE_NORMAL,
    CLOSE_PAUSED,
    CLOSE_TOKEN_ROTATED,
    CLOSE_AUTH_REJECTED,
];

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Maximum number of scheduled reconnects before giving up
    pub max_attempts: u32,
    /// Delay before the first reconnect, in milliseconds
    pub initial_delay_ms: u64,
    /// Ceiling for the backoff delay, in milliseconds
    pub max_delay_ms: u64,
    /// Upper bound (exclusive) of the random jitter added per step
    pub max_jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_jitter_ms: 1000,
        }
    }
}

/// Why a close did not schedule a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Destroyed,
    NonRetryableCode(u16),
    AttemptsExhausted,
    NoSubscribers,
    /// Deferred until the application becomes visible again.
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry,
    Skip(SkipReason),
}

/// Manager state the policy looks at when a socket closes.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectContext {
    pub destroyed: bool,
    pub has_subscribers: bool,
    pub visible: bool,
}

/// Tracks attempts and the current backoff delay.
///
/// Reset whenever a socket opens, so the backoff only grows across
/// consecutive failures.
#[derive(Debug, Clone)]
pub struct ReconnectScheduler {
    config: ReconnectConfig,
    attempts: u32,
    delay_ms: u64,
}

impl ReconnectScheduler {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            attempts: 0,
            delay_ms: config.initial_delay_ms,
            config,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay the next scheduled reconnect will use.
    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay_ms = self.config.initial_delay_ms;
    }

    /// Decide whether a close with `code` should schedule a reconnect.
    pub fn evaluate(&self, code: u16, context: ReconnectContext) -> ReconnectDecision {
        let skip = if context.destroyed {
            SkipReason::Destroyed
        } else if NON_RETRYABLE_CLOSE_CODES.contains(&code) {
            SkipReason::NonRetryableCode(code)
        } else if self.attempts >= self.config.max_attempts {
            SkipReason::AttemptsExhausted
        } else if !context.has_subscribers {
            SkipReason::NoSubscribers
        } else if !context.visible {
            SkipReason::Hidden
        } else {
            return ReconnectDecision::Retry;
        };
        ReconnectDecision::Skip(skip)
    }

    /// Count an attempt and return its delay, then grow the delay for the
    /// next one: `min(delay * 2 + jitter, max)`.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = if self.config.max_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.config.max_jitter_ms)
        };
        self.advance(jitter)
    }

    fn advance(&mut self, jitter_ms: u64) -> Duration {
        self.attempts += 1;
        let scheduled = self.delay_ms;
        self.delay_ms = scheduled
            .saturating_mul(2)
            .saturating_add(jitter_ms)
            .min(self.config.max_delay_ms);
        Duration::from_millis(scheduled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPEN: ReconnectContext = ReconnectContext {
        destroyed: false,
        has_subscribers: true,
        visible: true,
    };

    #[test]
    fn first_delay_is_initial_then_doubles_with_jitter() {
        let mut scheduler = ReconnectScheduler::new(ReconnectConfig::default());
        assert_eq!(scheduler.next_delay(), Duration::from_millis(1000));

        let second = scheduler.next_delay();
        assert!(second >= Duration::from_millis(2000), "{second:?}");
        assert!(second < Duration::from_millis(3000), "{second:?}");
        assert_eq!(scheduler.attempts(), 2);
    }

    #[test]
    fn delay_is_capped() {
        let mut scheduler = ReconnectScheduler::new(ReconnectConfig {
            max_attempts: 100,
            ..ReconnectConfig::default()
        });
        for _ in 0..20 {
            assert!(scheduler.next_delay() <= Duration::from_millis(30_000));
        }
        assert_eq!(scheduler.current_delay(), Duration::from_millis(30_000));
    }

    #[test]
    fn deterministic_growth_without_jitter() {
        let mut scheduler = ReconnectScheduler::new(ReconnectConfig::default());
        let delays: Vec<u64> = (0..6)
            .map(|_| scheduler.advance(0).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000]);
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut scheduler = ReconnectScheduler::new(ReconnectConfig::default());
        scheduler.next_delay();
        scheduler.next_delay();
        scheduler.reset();
        assert_eq!(scheduler.attempts(), 0);
        assert_eq!(scheduler.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn retries_abnormal_closes() {
        let scheduler = ReconnectScheduler::new(ReconnectConfig::default());
        assert_eq!(scheduler.evaluate(1006, OPEN), ReconnectDecision::Retry);
        assert_eq!(scheduler.evaluate(1011, OPEN), ReconnectDecision::Retry);
    }

    #[test]
    fn non_retryable_codes_are_skipped() {
        let scheduler = ReconnectScheduler::new(ReconnectConfig::default());
        for code in NON_RETRYABLE_CLOSE_CODES {
            assert_eq!(
                scheduler.evaluate(code, OPEN),
                ReconnectDecision::Skip(SkipReason::NonRetryableCode(code))
            );
        }
    }

    #[test]
    fn stops_after_max_attempts() {
        let mut scheduler = ReconnectScheduler::new(ReconnectConfig::default());
        for _ in 0..5 {
            assert_eq!(scheduler.evaluate(1006, OPEN), ReconnectDecision::Retry);
            scheduler.next_delay();
        }
        assert_eq!(
            scheduler.evaluate(1006, OPEN),
            ReconnectDecision::Skip(SkipReason::AttemptsExhausted)
        );
    }

    #[test]
    fn context_guards_in_order() {
        let scheduler = ReconnectScheduler::new(ReconnectConfig::default());
        let destroyed = ReconnectContext {
            destroyed: true,
            ..OPEN
        };
        assert_eq!(
            scheduler.evaluate(1000, destroyed),
            ReconnectDecision::Skip(SkipReason::Destroyed)
        );
        let idle = ReconnectContext {
            has_subscribers: false,
            visible: false,
            ..OPEN
        };
        assert_eq!(
            scheduler.evaluate(1006, idle),
            ReconnectDecision::Skip(SkipReason::NoSubscribers)
        );
        let hidden = ReconnectContext {
            visible: false,
            ..OPEN
        };
        assert_eq!(
            scheduler.evaluate(1006, hidden),
            ReconnectDecision::Skip(SkipReason::Hidden)
        );
    }
}
