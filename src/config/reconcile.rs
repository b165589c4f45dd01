//! Reconciler and sweep configuration

use serde::Deserialize;

use super::error::ValidationError;
use crate::application::handlers::subscription::{
    DEFAULT_MAX_WRITE_ATTEMPTS, DEFAULT_SWEEP_CONCURRENCY,
};

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// Compare-and-set attempts per event before giving up
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
}

impl ReconcilerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_write_attempts == 0 {
            return Err(ValidationError::MustBePositive("reconciler.max_write_attempts"));
        }
        Ok(())
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: default_max_write_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Concurrent processor queries during a sweep
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Seconds between scheduled full sweeps in `serve`; 0 disables them
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

impl SweepConfig {
    pub fn is_scheduled(&self) -> bool {
        self.interval_secs > 0
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.concurrency == 0 {
            return Err(ValidationError::MustBePositive("sweep.concurrency"));
        }
        Ok(())
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            interval_secs: default_interval(),
        }
    }
}

fn default_max_write_attempts() -> u32 {
    DEFAULT_MAX_WRITE_ATTEMPTS
}

fn default_concurrency() -> usize {
    DEFAULT_SWEEP_CONCURRENCY
}

fn default_interval() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ReconcilerConfig::default().validate().is_ok());
        let sweep = SweepConfig::default();
        assert!(sweep.validate().is_ok());
        assert!(sweep.is_scheduled());
    }

    #[test]
    fn zero_values_are_rejected() {
        let reconciler = ReconcilerConfig {
            max_write_attempts: 0,
        };
        assert!(reconciler.validate().is_err());

        let sweep = SweepConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(sweep.validate().is_err());
    }

    #[test]
    fn zero_interval_disables_schedule() {
        let sweep = SweepConfig {
            interval_secs: 0,
            ..Default::default()
        };
        assert!(!sweep.is_scheduled());
        assert!(sweep.validate().is_ok());
    }
}
