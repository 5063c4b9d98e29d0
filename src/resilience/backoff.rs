//! Backoff Policy
//!
//! Maps an attempt number to a retry delay: exponential growth, clamped to a
//! ceiling, with symmetric jitter drawn from a caller-supplied random source.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PolicyError {
    #[error("base_delay must be positive and finite (got {0}s)")]
    BaseDelay(f64),
    #[error("multiplier must be >= 1 and finite (got {0})")]
    Multiplier(f64),
    #[error("max_delay must be non-negative and finite (got {0}s)")]
    MaxDelay(f64),
    #[error("jitter_fraction must be within [0, 1] (got {0})")]
    Jitter(f64),
    #[error("max_attempts must be at least 1")]
    MaxAttempts,
}

/// Immutable retry schedule. Construct once, share freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BackoffSettings", into = "BackoffSettings")]
pub struct BackoffPolicy {
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter_fraction: f64,
    max_attempts: u32,
}

/// On-disk shape of a [`BackoffPolicy`], in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub base_delay_secs: f64,
    pub multiplier: f64,
    pub max_delay_secs: f64,
    pub jitter_fraction: f64,
    pub max_attempts: u32,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_delay_secs: 1.0,
            multiplier: 2.0,
            max_delay_secs: 60.0,
            jitter_fraction: 0.1,
            max_attempts: 5,
        }
    }
}

impl TryFrom<BackoffSettings> for BackoffPolicy {
    type Error = PolicyError;

    fn try_from(s: BackoffSettings) -> Result<Self, Self::Error> {
        let base_delay = Duration::try_from_secs_f64(s.base_delay_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or(PolicyError::BaseDelay(s.base_delay_secs))?;
        let max_delay = Duration::try_from_secs_f64(s.max_delay_secs)
            .map_err(|_| PolicyError::MaxDelay(s.max_delay_secs))?;
        BackoffPolicy::new(base_delay, s.multiplier, max_delay, s.jitter_fraction, s.max_attempts)
    }
}

impl From<BackoffPolicy> for BackoffSettings {
    fn from(p: BackoffPolicy) -> Self {
        Self {
            base_delay_secs: p.base_delay.as_secs_f64(),
            multiplier: p.multiplier,
            max_delay_secs: p.max_delay.as_secs_f64(),
            jitter_fraction: p.jitter_fraction,
            max_attempts: p.max_attempts,
        }
    }
}

impl BackoffPolicy {
    pub fn new(
        base_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter_fraction: f64,
        max_attempts: u32,
    ) -> Result<Self, PolicyError> {
        if base_delay.is_zero() {
            return Err(PolicyError::BaseDelay(0.0));
        }
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(PolicyError::Multiplier(multiplier));
        }
        if !(0.0..=1.0).contains(&jitter_fraction) {
            return Err(PolicyError::Jitter(jitter_fraction));
        }
        if max_attempts == 0 {
            return Err(PolicyError::MaxAttempts);
        }
        Ok(Self { base_delay, multiplier, max_delay, jitter_fraction, max_attempts })
    }

    /// Same schedule without jitter.
    pub fn without_jitter(&self) -> Self {
        Self { jitter_fraction: 0.0, ..self.clone() }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Smallest exponent at which `base * multiplier^n` reaches `max_delay`.
    fn saturation_exponent(&self) -> u32 {
        let ratio = self.max_delay.as_secs_f64() / self.base_delay.as_secs_f64();
        if ratio <= 1.0 || self.multiplier <= 1.0 {
            return 0;
        }
        // Float-to-int `as` saturates at u32::MAX.
        (ratio.ln() / self.multiplier.ln()).ceil() as u32
    }

    /// Clamp `secs` into `[0, max_delay]`, mapping anything unrepresentable to `max_delay`.
    fn clamped(&self, secs: f64) -> Duration {
        Duration::try_from_secs_f64(secs.max(0.0)).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// `base_delay * multiplier^attempt`, clamped to `max_delay`, before jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        if self.multiplier <= 1.0 {
            return self.base_delay.min(self.max_delay);
        }
        if attempt >= self.saturation_exponent() {
            return self.max_delay;
        }
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powf(f64::from(attempt));
        self.clamped(raw)
    }

    /// Delay to wait before retrying after failed attempt number `attempt` (0-based).
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter_fraction == 0.0 || nominal.is_zero() {
            return nominal;
        }
        let delay = nominal.as_secs_f64();
        let spread = delay * self.jitter_fraction;
        self.clamped(delay + rng.gen_range(-spread..=spread))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.1,
            max_attempts: 5,
        }
    }
}
