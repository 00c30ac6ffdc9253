//! E2 bus transport layer
//!
//! This module defines the line-level contract a platform must provide
//! ([`E2Bus`]), the bit-banged master built on it, the transaction recipes
//! with PEC handling, and a mock bus with a simulated EE871 slave for host
//! testing ([`mock`]).

pub(crate) mod bitbang;
pub(crate) mod frame;
pub mod mock;

pub use mock::{MockBus, MockDevice, WireEvent};

/// Line-level access to an E2 bus.
///
/// Platform implementations must provide this interface for the two
/// open-drain bus lines plus a blocking microsecond delay. The driver only
/// ever *releases* or *pulls down* a line; the pull-up resistors raise it.
///
/// Level convention: `true` = release the line (pull-up raises it),
/// `false` = actively drive it low.
///
/// # Safety Invariants
///
/// - Both pins must be configured open-drain (or input/output-low emulated)
///   before the driver is used
/// - Only one owner per bus; no concurrent access from multiple contexts
/// - `delay_us` must block for *at least* the requested time; it is never
///   required to be exact
pub trait E2Bus {
    /// Set the clock line: release (`true`) or drive low (`false`)
    fn set_scl(&mut self, released: bool);

    /// Set the data line: release (`true`) or drive low (`false`)
    fn set_sda(&mut self, released: bool);

    /// Sample the clock line; `true` if high
    fn read_scl(&mut self) -> bool;

    /// Sample the data line; `true` if high
    fn read_sda(&mut self) -> bool;

    /// Block for at least `us` microseconds
    fn delay_us(&mut self, us: u32);
}
