//! Retry strategies and polling loops for remote calls.
//!
//! Two shapes of waiting show up when talking to release targets:
//!
//! - **Retrying** a call that failed transiently (an upload that hit a 503),
//!   with a backoff strategy between attempts. See [`RetryExecutor`].
//! - **Polling** a remote resource that is changing state on its own (a
//!   staging repository being closed), at a fixed interval with a bounded
//!   number of checks. See [`poll_until`].
//!
//! # Example
//!
//! ```
//! use herald_retry::{RetryPolicy, RetryStrategyConfig, calculate_delay};
//! use std::time::Duration;
//!
//! let config = RetryPolicy::Default.to_config();
//! let delay = calculate_delay(&config, 2);
//! assert!(delay <= config.max_delay.mul_f64(1.0 + config.jitter));
//!
//! let custom = RetryStrategyConfig {
//!     max_attempts: 5,
//!     base_delay: Duration::from_secs(1),
//!     ..Default::default()
//! };
//! assert_eq!(custom.max_attempts, 5);
//! ```

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries
    Immediate,
    /// Delay doubles each attempt (default)
    #[default]
    Exponential,
    /// Delay grows by `base_delay` each attempt
    Linear,
    /// Same delay every attempt
    Constant,
}

/// Predefined retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    #[default]
    Default,
    /// More attempts, faster recovery
    Aggressive,
    /// Fewer attempts, longer delays
    Conservative,
    /// A single attempt
    None,
}

impl RetryPolicy {
    pub fn to_config(&self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Default => RetryStrategyConfig::default(),
            RetryPolicy::Aggressive => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 8,
                base_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(15),
                jitter: 0.3,
            },
            RetryPolicy::Conservative => RetryStrategyConfig {
                strategy: RetryStrategyType::Linear,
                max_attempts: 3,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                jitter: 0.1,
            },
            RetryPolicy::None => RetryStrategyConfig {
                strategy: RetryStrategyType::Immediate,
                max_attempts: 1,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                jitter: 0.0,
            },
        }
    }
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    #[serde(default)]
    pub strategy: RetryStrategyType,
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor (0.0 = none, 0.5 = delay * 0.5..1.5).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyType::Exponential,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Delay before the attempt following `attempt` (1-indexed).
///
/// ```
/// use herald_retry::{RetryStrategyConfig, RetryStrategyType, calculate_delay};
/// use std::time::Duration;
///
/// let config = RetryStrategyConfig {
///     strategy: RetryStrategyType::Exponential,
///     base_delay: Duration::from_secs(1),
///     max_delay: Duration::from_secs(60),
///     jitter: 0.0,
///     max_attempts: 10,
/// };
/// assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
/// assert_eq!(calculate_delay(&config, 3), Duration::from_secs(4));
/// ```
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt.max(1)),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);
    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    let factor = 1.0 - jitter + rand::random::<f64>() * 2.0 * jitter;
    let millis = (delay.as_millis() as f64 * factor).round() as u64;
    Duration::from_millis(millis)
}

/// Runs a fallible operation with the configured retry behavior.
pub struct RetryExecutor {
    config: RetryStrategyConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryStrategyConfig) -> Self {
        Self { config }
    }

    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self::new(policy.to_config())
    }

    pub fn config(&self) -> &RetryStrategyConfig {
        &self.config
    }

    /// Retry every error until attempts run out.
    pub fn run<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_if(operation, |_| true)
    }

    /// Retry only errors for which `should_retry` returns true; any other
    /// error is returned immediately.
    ///
    /// ```
    /// use herald_retry::{RetryExecutor, RetryPolicy};
    ///
    /// let executor = RetryExecutor::from_policy(RetryPolicy::None);
    /// let result: Result<(), &str> = executor.run_if(|_| Err("fatal"), |e| *e != "fatal");
    /// assert_eq!(result, Err("fatal"));
    /// ```
    pub fn run_if<T, E, F, P>(&self, mut operation: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= max_attempts || !should_retry(&e) {
                        return Err(e);
                    }
                    thread::sleep(calculate_delay(&self.config, attempt));
                    attempt += 1;
                }
            }
        }
    }
}

/// One observation made by a polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    /// The awaited condition holds.
    Ready(T),
    /// Not there yet; poll again.
    Pending,
}

/// Fixed-interval polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Wait before each check.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Number of checks before giving up.
    pub max_checks: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_checks: 60,
        }
    }
}

/// Result of a polling loop that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult<T> {
    Ready { value: T, checks: u32 },
    Exhausted { checks: u32 },
}

/// Sleep `interval`, check, repeat, at most `max_checks` times.
///
/// The first error returned by `check` stops the loop and is propagated.
///
/// ```
/// use herald_retry::{PollConfig, PollResult, PollStatus, poll_until};
/// use std::time::Duration;
///
/// let config = PollConfig { interval: Duration::ZERO, max_checks: 5 };
/// let result: Result<_, ()> = poll_until(&config, |check| {
///     Ok(if check == 3 { PollStatus::Ready("closed") } else { PollStatus::Pending })
/// });
/// assert_eq!(result, Ok(PollResult::Ready { value: "closed", checks: 3 }));
/// ```
pub fn poll_until<T, E, F>(config: &PollConfig, mut check: F) -> Result<PollResult<T>, E>
where
    F: FnMut(u32) -> Result<PollStatus<T>, E>,
{
    for n in 1..=config.max_checks {
        if !config.interval.is_zero() {
            thread::sleep(config.interval);
        }
        if let PollStatus::Ready(value) = check(n)? {
            return Ok(PollResult::Ready { value, checks: n });
        }
    }
    Ok(PollResult::Exhausted {
        checks: config.max_checks,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use proptest::prelude::*;

    use super::*;

    fn no_jitter(strategy: RetryStrategyType) -> RetryStrategyConfig {
        RetryStrategyConfig {
            strategy,
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
        }
    }

    #[test]
    fn policies_map_to_expected_configs() {
        assert_eq!(RetryPolicy::Default.to_config(), RetryStrategyConfig::default());
        assert_eq!(RetryPolicy::None.to_config().max_attempts, 1);
        assert_eq!(
            RetryPolicy::Conservative.to_config().strategy,
            RetryStrategyType::Linear
        );
    }

    #[test]
    fn delays_follow_strategy_and_cap() {
        let exp = no_jitter(RetryStrategyType::Exponential);
        assert_eq!(calculate_delay(&exp, 1), Duration::from_millis(100));
        assert_eq!(calculate_delay(&exp, 4), Duration::from_millis(800));
        assert_eq!(calculate_delay(&exp, 9), Duration::from_secs(1));

        let lin = no_jitter(RetryStrategyType::Linear);
        assert_eq!(calculate_delay(&lin, 3), Duration::from_millis(300));

        let constant = no_jitter(RetryStrategyType::Constant);
        assert_eq!(calculate_delay(&constant, 7), Duration::from_millis(100));

        let immediate = no_jitter(RetryStrategyType::Immediate);
        assert_eq!(calculate_delay(&immediate, 2), Duration::ZERO);
    }

    #[test]
    fn executor_stops_on_non_retryable_error() {
        let executor = RetryExecutor::new(RetryStrategyConfig {
            max_attempts: 5,
            jitter: 0.0,
            ..no_jitter(RetryStrategyType::Immediate)
        });
        let calls = Cell::new(0);
        let result: Result<(), &str> = executor.run_if(
            |_| {
                calls.set(calls.get() + 1);
                Err(if calls.get() < 2 { "transient" } else { "permanent" })
            },
            |e| *e == "transient",
        );
        assert_eq!(result, Err("permanent"));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn executor_gives_up_after_max_attempts() {
        let executor = RetryExecutor::new(RetryStrategyConfig {
            max_attempts: 3,
            ..no_jitter(RetryStrategyType::Immediate)
        });
        let calls = Cell::new(0);
        let result: Result<(), u32> = executor.run(|attempt| {
            calls.set(attempt);
            Err(attempt)
        });
        assert_eq!(result, Err(3));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn executor_returns_first_success() {
        let executor = RetryExecutor::new(no_jitter(RetryStrategyType::Immediate));
        let result: Result<u32, ()> =
            executor.run(|attempt| if attempt == 2 { Ok(attempt) } else { Err(()) });
        assert_eq!(result, Ok(2));
    }

    #[test]
    fn poll_until_reports_exhaustion() {
        let config = PollConfig {
            interval: Duration::ZERO,
            max_checks: 4,
        };
        let seen = Cell::new(0);
        let result: Result<PollResult<()>, ()> = poll_until(&config, |n| {
            seen.set(n);
            Ok(PollStatus::Pending)
        });
        assert_eq!(result, Ok(PollResult::Exhausted { checks: 4 }));
        assert_eq!(seen.get(), 4);
    }

    #[test]
    fn poll_until_propagates_check_errors() {
        let config = PollConfig {
            interval: Duration::ZERO,
            max_checks: 10,
        };
        let result: Result<PollResult<()>, &str> =
            poll_until(&config, |n| if n == 2 { Err("failed") } else { Ok(PollStatus::Pending) });
        assert_eq!(result, Err("failed"));
    }

    #[test]
    fn poll_with_zero_budget_never_checks() {
        let config = PollConfig {
            interval: Duration::ZERO,
            max_checks: 0,
        };
        let result: Result<PollResult<()>, ()> = poll_until(&config, |_| panic!("checked"));
        assert_eq!(result, Ok(PollResult::Exhausted { checks: 0 }));
    }

    #[test]
    fn config_deserializes_humantime_durations() {
        let config: RetryStrategyConfig = serde_json::from_str(
            r#"{"strategy":"constant","max_attempts":2,"base_delay":"250ms","max_delay":"5s","jitter":0.0}"#,
        )
        .expect("parse");
        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert_eq!(config.strategy, RetryStrategyType::Constant);
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_within_band(
            base_ms in 1u64..5_000,
            attempt in 1u32..40,
            jitter in 0.0f64..1.0,
        ) {
            let config = RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 50,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_secs(60),
                jitter,
            };
            let delay = calculate_delay(&config, attempt);
            let upper = Duration::from_secs(60).mul_f64(1.0 + jitter) + Duration::from_millis(1);
            prop_assert!(delay <= upper);
        }
    }
}
