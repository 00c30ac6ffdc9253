//! Driver configuration
//!
//! Numeric settings for the bit-banged E2 master. The defaults follow the
//! EE871 datasheet: 100 us clock phases (5 kHz), generous START/STOP holds,
//! and the specified worst-case stretch and flash-commit budgets.

use super::commands::DEVICE_ADDRESS_MAX;
use super::status::{Error, ErrorKind, Result};

/// Minimum clock-low / clock-high width per the E2 spec
pub const CLOCK_MIN_US: u32 = 100;
/// Minimum START/STOP hold per the E2 spec
pub const HOLD_MIN_US: u32 = 4;
/// Upper bound accepted for the single-byte flash-commit delay
pub const WRITE_DELAY_MAX_MS: u32 = 5000;
/// Upper bound accepted for the interval-pair flash-commit delay
pub const INTERVAL_WRITE_DELAY_MAX_MS: u32 = 5000;

/// Configuration for the EE871 driver
///
/// Copied into the driver on `begin` and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// E2 device address (0-7)
    pub device_address: u8,

    /// Minimum clock low time in us
    pub clock_low_us: u32,
    /// Minimum clock high time in us
    pub clock_high_us: u32,
    /// START hold time in us (spec min 4, default matches the clock phase
    /// for margin)
    pub start_hold_us: u32,
    /// STOP hold time in us (spec min 4, default matches the clock phase
    /// for margin)
    pub stop_hold_us: u32,

    /// Clock-stretch budget per bit in us
    pub bit_timeout_us: u32,
    /// Clock-stretch budget per byte (all nine clock periods) in us
    pub byte_timeout_us: u32,

    /// Flash-commit delay after a single custom-memory write, in ms
    pub write_delay_ms: u32,
    /// Flash-commit delay after the interval pair write, in ms
    pub interval_write_delay_ms: u32,

    /// Consecutive failures before the driver reports OFFLINE
    pub offline_threshold: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_address: 0,
            clock_low_us: 100,
            clock_high_us: 100,
            start_hold_us: 100,
            stop_hold_us: 100,
            bit_timeout_us: 25_000,
            byte_timeout_us: 35_000,
            write_delay_ms: 150,
            interval_write_delay_ms: 300,
            offline_threshold: 5,
        }
    }
}

impl Config {
    /// Check every configuration rule, returning the first violation
    pub fn validate(&self) -> Result<()> {
        if self.device_address > DEVICE_ADDRESS_MAX {
            return Err(Error::with_detail(
                ErrorKind::InvalidConfig,
                "device address above 7",
                i32::from(self.device_address),
            ));
        }
        if self.clock_low_us < CLOCK_MIN_US || self.clock_high_us < CLOCK_MIN_US {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "clock timing below spec",
            ));
        }
        if self.start_hold_us < HOLD_MIN_US || self.stop_hold_us < HOLD_MIN_US {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "start/stop hold below spec",
            ));
        }
        if self.bit_timeout_us == 0 || self.byte_timeout_us == 0 {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "timeouts must be non-zero",
            ));
        }
        if self.byte_timeout_us < self.bit_timeout_us {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "byte timeout below bit timeout",
            ));
        }
        if self.offline_threshold == 0 {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                "offline threshold must be > 0",
            ));
        }
        if self.write_delay_ms > WRITE_DELAY_MAX_MS {
            return Err(Error::with_detail(
                ErrorKind::InvalidConfig,
                "write delay exceeds safe limit",
                self.write_delay_ms as i32,
            ));
        }
        if self.interval_write_delay_ms > INTERVAL_WRITE_DELAY_MAX_MS {
            return Err(Error::with_detail(
                ErrorKind::InvalidConfig,
                "interval write delay exceeds safe limit",
                self.interval_write_delay_ms as i32,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.bit_timeout_us, 25_000);
        assert_eq!(cfg.byte_timeout_us, 35_000);
        assert_eq!(cfg.write_delay_ms, 150);
        assert_eq!(cfg.interval_write_delay_ms, 300);
        assert_eq!(cfg.offline_threshold, 5);
    }

    fn kind(cfg: &Config) -> ErrorKind {
        cfg.validate().unwrap_err().kind
    }

    #[test]
    fn device_address_boundary() {
        let mut cfg = Config::default();
        cfg.device_address = 7;
        assert!(cfg.validate().is_ok());
        cfg.device_address = 8;
        assert_eq!(kind(&cfg), ErrorKind::InvalidConfig);
    }

    #[test]
    fn clock_floor_boundary() {
        let mut cfg = Config::default();
        cfg.clock_low_us = 100;
        assert!(cfg.validate().is_ok());
        cfg.clock_low_us = 99;
        assert_eq!(kind(&cfg), ErrorKind::InvalidConfig);

        let mut cfg = Config::default();
        cfg.clock_high_us = 99;
        assert_eq!(kind(&cfg), ErrorKind::InvalidConfig);
    }

    #[test]
    fn hold_floor_boundary() {
        let mut cfg = Config::default();
        cfg.start_hold_us = 4;
        cfg.stop_hold_us = 4;
        assert!(cfg.validate().is_ok());
        cfg.start_hold_us = 3;
        assert_eq!(kind(&cfg), ErrorKind::InvalidConfig);
    }

    #[test]
    fn timeout_rules() {
        let mut cfg = Config::default();
        cfg.bit_timeout_us = 0;
        assert_eq!(kind(&cfg), ErrorKind::InvalidConfig);

        let mut cfg = Config::default();
        cfg.byte_timeout_us = 0;
        assert_eq!(kind(&cfg), ErrorKind::InvalidConfig);

        let mut cfg = Config::default();
        cfg.bit_timeout_us = 40_000;
        assert_eq!(kind(&cfg), ErrorKind::InvalidConfig);

        cfg.byte_timeout_us = 40_000;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn offline_threshold_boundary() {
        let mut cfg = Config::default();
        cfg.offline_threshold = 1;
        assert!(cfg.validate().is_ok());
        cfg.offline_threshold = 0;
        assert_eq!(kind(&cfg), ErrorKind::InvalidConfig);
    }

    #[test]
    fn flash_delay_boundary() {
        let mut cfg = Config::default();
        cfg.write_delay_ms = 5000;
        assert!(cfg.validate().is_ok());
        cfg.write_delay_ms = 5001;
        assert_eq!(kind(&cfg), ErrorKind::InvalidConfig);

        let mut cfg = Config::default();
        cfg.interval_write_delay_ms = 5000;
        assert!(cfg.validate().is_ok());
        cfg.interval_write_delay_ms = 5001;
        assert_eq!(kind(&cfg), ErrorKind::InvalidConfig);
    }
}
