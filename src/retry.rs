//! Retrying transient bus failures
//!
//! [`RetryTransport`] wraps any [`Transport`] and repeats failed calls
//! according to a [`RetryPolicy`]. Errors outside the policy's allow-list
//! pass straight through, and after the last attempt the last error is
//! returned unchanged.

use core::time::Duration;

use embedded_hal::delay::DelayNs;
use log::{debug, warn};
use rand::Rng;

use crate::error::{Error, ErrorKind, Result};
use crate::traits::Transport;

/// How the pause between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Always the base delay
    Fixed,
    /// Base delay times the attempt number
    Linear,
    /// Base delay times `backoff_factor ^ attempt`
    #[default]
    Exponential,
    /// Exponential, with uniform noise of up to `jitter` of the delay added
    Jittered,
}

/// Configuration of [`RetryTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    backoff_factor: f64,
    strategy: BackoffStrategy,
    max_delay: Duration,
    jitter: f64,
    retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            strategy: BackoffStrategy::Exponential,
            max_delay: Duration::from_secs(10),
            jitter: 0.1,
            retryable: vec![ErrorKind::Communication, ErrorKind::Timeout],
        }
    }
}

impl RetryPolicy {
    /// Attempts including the first one
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Base delay between attempts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Growth factor for [`BackoffStrategy::Exponential`] and [`BackoffStrategy::Jittered`]
    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Backoff strategy
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Upper bound of every computed delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Noise fraction for [`BackoffStrategy::Jittered`], within `0.0..=1.0`
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Error kinds that get another attempt
    pub fn with_retryable(mut self, kinds: &[ErrorKind]) -> Self {
        self.retryable = kinds.to_vec();
        self
    }

    /// Attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether an error of `kind` gets another attempt
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Checks every field, [`RetryTransport::new`] calls this
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(Error::InvalidParameter(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(Error::InvalidParameter(
                "backoff_factor must be at least 1.0".into(),
            ));
        }
        if self.max_delay < self.delay {
            return Err(Error::InvalidParameter(
                "max_delay must be at least as large as delay".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::InvalidParameter(
                "jitter must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Pause after the failed attempt number `attempt`, counted from 0
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }
        let base = self.delay.as_secs_f64();
        let exponential = || base * self.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base * f64::from(attempt.saturating_add(1)),
            BackoffStrategy::Exponential => exponential(),
            BackoffStrategy::Jittered => {
                let delay = exponential();
                let noise = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
                delay + noise * delay
            }
        };
        let capped = secs.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::try_from_secs_f64(capped).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// The policy used for `wait_ready`: the wait already has its own
    /// bound, so timeouts are not repeated
    fn without_timeouts(&self) -> Self {
        let mut policy = self.clone();
        policy.retryable.retain(|k| *k != ErrorKind::Timeout);
        policy
    }
}

/// A [`Transport`] that repeats failed calls
pub struct RetryTransport<T, D> {
    inner: T,
    delay: D,
    policy: RetryPolicy,
    wait_policy: RetryPolicy,
}

impl<T, D> RetryTransport<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Wraps `inner`, sleeping on `delay` between attempts
    pub fn new(inner: T, delay: D, policy: RetryPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(RetryTransport {
            inner,
            delay,
            wait_policy: policy.without_timeouts(),
            policy,
        })
    }

    /// The active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The wrapped transport
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Unwraps the transport
    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn with_retry<T, D, R>(
    inner: &mut T,
    delay: &mut D,
    policy: &RetryPolicy,
    operation: &str,
    mut call: impl FnMut(&mut T) -> Result<R>,
) -> Result<R>
where
    D: DelayNs,
{
    let mut attempt = 0;
    loop {
        match call(inner) {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{operation} succeeded after {} attempts", attempt + 1);
                }
                return Ok(value);
            }
            Err(err) if policy.is_retryable(err.kind()) && attempt + 1 < policy.max_attempts => {
                let pause = policy.calculate_delay(attempt);
                warn!(
                    "{operation} failed (attempt {}/{}): {err}, retrying in {pause:?}",
                    attempt + 1,
                    policy.max_attempts
                );
                delay.delay_us(u32::try_from(pause.as_micros()).unwrap_or(u32::MAX));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

impl<T, D> Transport for RetryTransport<T, D>
where
    T: Transport,
    D: DelayNs,
{
    fn init(&mut self) -> Result<()> {
        with_retry(&mut self.inner, &mut self.delay, &self.policy, "init", |t| t.init())
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn reset(&mut self) -> Result<()> {
        with_retry(&mut self.inner, &mut self.delay, &self.policy, "reset", |t| t.reset())
    }

    fn wait_ready(&mut self, timeout_ms: u32) -> Result<()> {
        with_retry(
            &mut self.inner,
            &mut self.delay,
            &self.wait_policy,
            "wait_ready",
            |t| t.wait_ready(timeout_ms),
        )
    }

    fn write_command(&mut self, command: u16) -> Result<()> {
        with_retry(
            &mut self.inner,
            &mut self.delay,
            &self.policy,
            "write_command",
            |t| t.write_command(command),
        )
    }

    fn write_data(&mut self, data: u16) -> Result<()> {
        with_retry(
            &mut self.inner,
            &mut self.delay,
            &self.policy,
            "write_data",
            |t| t.write_data(data),
        )
    }

    fn write_data_bulk(&mut self, data: &[u16]) -> Result<()> {
        with_retry(
            &mut self.inner,
            &mut self.delay,
            &self.policy,
            "write_data_bulk",
            |t| t.write_data_bulk(data),
        )
    }

    fn read_data(&mut self) -> Result<u16> {
        with_retry(&mut self.inner, &mut self.delay, &self.policy, "read_data", |t| {
            t.read_data()
        })
    }

    fn read_data_bulk(&mut self, length: usize) -> Result<Vec<u16>> {
        with_retry(
            &mut self.inner,
            &mut self.delay,
            &self.policy,
            "read_data_bulk",
            |t| t.read_data_bulk(length),
        )
    }
}
