//! Calibration settings.

use std::env;

use crate::error::{ClockSyncError, Result};

pub const ENV_SPIN_TICKS: &str = "CLOCKSYNC_SPIN_TICKS";
pub const ENV_WARMUP_TICKS: &str = "CLOCKSYNC_WARMUP_TICKS";

pub const DEFAULT_SPIN_TICKS: u64 = 1_000_000_000;
pub const DEFAULT_WARMUP_TICKS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationConfig {
    /// Length of the timed spin in device ticks. About one second on a
    /// nanosecond counter at the default.
    pub spin_ticks: u64,
    /// Length of the discarded warm-up spin.
    pub warmup_ticks: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            spin_ticks: DEFAULT_SPIN_TICKS,
            warmup_ticks: DEFAULT_WARMUP_TICKS,
        }
    }
}

impl CalibrationConfig {
    pub fn with_spin_ticks(mut self, spin_ticks: u64) -> Self {
        self.spin_ticks = spin_ticks;
        self
    }

    /// Defaults overlaid with `CLOCKSYNC_SPIN_TICKS` / `CLOCKSYNC_WARMUP_TICKS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_SPIN_TICKS) {
            config.spin_ticks = parse_ticks(ENV_SPIN_TICKS, &v)?;
        }
        if let Some(v) = lookup(ENV_WARMUP_TICKS) {
            config.warmup_ticks = parse_ticks(ENV_WARMUP_TICKS, &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.spin_ticks == 0 {
            return Err(ClockSyncError::InvalidConfig("spin_ticks must be non-zero".into()));
        }
        Ok(())
    }
}

fn parse_ticks(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .replace('_', "")
        .parse()
        .map_err(|_| ClockSyncError::InvalidConfig(format!("{} must be a tick count, got {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let c = CalibrationConfig::from_lookup(|_| None).unwrap();
        assert_eq!(c, CalibrationConfig::default());
        assert_eq!(c.spin_ticks, 1_000_000_000);
        assert_eq!(c.warmup_ticks, 1_000);
    }

    #[test]
    fn env_overrides() {
        let c = CalibrationConfig::from_lookup(|k| match k {
            ENV_SPIN_TICKS => Some("5_000_000".into()),
            ENV_WARMUP_TICKS => Some(" 10 ".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(c.spin_ticks, 5_000_000);
        assert_eq!(c.warmup_ticks, 10);
    }

    #[test]
    fn rejects_bad_values() {
        let bad = CalibrationConfig::from_lookup(|k| (k == ENV_SPIN_TICKS).then(|| "lots".to_string()));
        assert!(matches!(bad, Err(ClockSyncError::InvalidConfig(_))));

        let zero = CalibrationConfig::from_lookup(|k| (k == ENV_SPIN_TICKS).then(|| "0".to_string()));
        assert!(matches!(zero, Err(ClockSyncError::InvalidConfig(_))));
    }
}
