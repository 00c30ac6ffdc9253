#![cfg_attr(not(test), no_std)]

//! ee871 - Bit-banged E2 bus master driver for the E+E EE871 CO2 probe
//!
//! The E2 bus is a two-wire open-drain protocol electrically similar to I2C
//! but with slower clocks (500-5000 Hz), its own control-byte layout, and a
//! mandatory additive packet-error-code (PEC) on every transfer. This crate
//! provides the bus master and a managed device driver on top of it:
//!
//! - [`bus`]: the [`E2Bus`] transport contract, the bit-banged line driver,
//!   the transaction/PEC frame layer, and a mock bus with a simulated slave
//!   for host testing.
//! - [`device`]: the EE871 command table, configuration, error types, and
//!   the [`Ee871Driver`] device layer with health tracking and bus-recovery
//!   discipline.
//!
//! The driver is strictly synchronous: every operation blocks from START to
//! STOP and the caller supplies both the pin access (via [`E2Bus`]) and the
//! wall clock (via [`Ee871Driver::tick`]).

pub mod bus;
pub mod device;
mod logging;

// Re-export commonly used types
pub use bus::{E2Bus, MockBus, MockDevice};
pub use device::{
    Config, DriverState, Ee871Driver, Error, ErrorKind, Measurements, OperatingFunctions,
    OperatingMode, OperatingModeSupport, Result, SensorStatus, SpecialFeatures,
};
