//! Reserved step-argument keys consumed by executors
//!
//! Two argument keys are interpreted by the executor and stripped before the
//! action sees its arguments: a per-step timeout in seconds and a per-step
//! retry policy. Malformed values are ignored with a warning rather than
//! failing the run, matching lenient configuration handling elsewhere.

use serde_json::{Map, Value};
use std::time::Duration;
use tracing::warn;

/// Reserved key carrying a per-step timeout in seconds
pub const TIMEOUT_KEY: &str = "__timeout__";

/// Reserved key carrying a per-step retry policy object
pub const RETRY_KEY: &str = "__retry__";

/// Bounded retry schedule for a step's action
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1
    pub max_attempts: u32,
    /// Sleep before the second attempt, in seconds
    pub backoff: f64,
    /// Factor applied to the backoff after each failed attempt
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: 0.0,
            multiplier: 1.0,
        }
    }

    /// Create a policy, validating the invariants
    pub fn new(max_attempts: u32, backoff: f64, multiplier: f64) -> Option<Self> {
        if max_attempts < 1 || backoff < 0.0 || multiplier < 0.0 {
            return None;
        }
        Some(Self {
            max_attempts,
            backoff,
            multiplier,
        })
    }

    /// Parse the `__retry__` object shape; `None` when malformed
    ///
    /// Absent sub-fields fall back to `max_attempts: 3`, `backoff: 0.1`,
    /// `multiplier: 2.0`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let max_attempts = match obj.get("max_attempts") {
            Some(v) => u32::try_from(v.as_u64()?).ok()?,
            None => 3,
        };
        let backoff = match obj.get("backoff") {
            Some(v) => v.as_f64()?,
            None => 0.1,
        };
        let multiplier = match obj.get("multiplier") {
            Some(v) => v.as_f64()?,
            None => 2.0,
        };
        Self::new(max_attempts, backoff, multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Per-step executor overrides extracted from reserved argument keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOverrides {
    /// Wall-clock timeout in seconds, measured from dispatch
    pub timeout_secs: Option<f64>,
    /// Retry policy override
    pub retry: Option<RetryPolicy>,
}

impl StepOverrides {
    /// Strip and parse the reserved keys from an argument map
    pub fn extract(args: &mut Map<String, Value>) -> Self {
        let mut overrides = Self::default();

        if let Some(raw) = args.remove(TIMEOUT_KEY) {
            // bounds check via Duration itself: rejects negatives, NaN,
            // infinities and values too large to represent
            let valid = |t: &f64| Duration::try_from_secs_f64(*t).is_ok();
            overrides.timeout_secs = match &raw {
                Value::Number(n) => n.as_f64().filter(valid),
                Value::String(s) => s.parse::<f64>().ok().filter(valid),
                _ => None,
            };
            if overrides.timeout_secs.is_none() {
                warn!(value = %raw, "ignoring malformed {} value", TIMEOUT_KEY);
            }
        }

        if let Some(raw) = args.remove(RETRY_KEY) {
            overrides.retry = RetryPolicy::from_value(&raw);
            if overrides.retry.is_none() {
                warn!(value = %raw, "ignoring malformed {} value", RETRY_KEY);
            }
        }

        overrides
    }

    /// The timeout as a [`Duration`], if declared and representable
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
    }
}
