//! EE871 device layer
//!
//! Command table, configuration, error types, and the managed driver.

pub mod commands;
pub mod config;
pub mod driver;
pub mod status;

// Re-export commonly used types
pub use commands::{
    Measurements, OperatingFunctions, OperatingMode, OperatingModeSupport, SensorStatus,
    SpecialFeatures,
};
pub use config::Config;
pub use driver::{DriverState, Ee871Driver};
pub use status::{Error, ErrorKind, Result};
