//! Bit-banged E2 line driver
//!
//! Bit-level and byte-level primitives over an [`E2Bus`]. Every data/ACK
//! primitive assumes SCL is low on entry and leaves it low on exit, so the
//! frame layer can chain them without touching the lines itself. START and
//! STOP own the transitions in and out of the idle state.
//!
//! Timeouts: a slave may stretch the clock by holding SCL low. The stretch
//! wait polls in small steps against two budgets: the per-bit budget
//! (`bit_timeout_us`) and a per-byte accumulator that spans all nine clock
//! periods of a byte plus its ACK (`byte_timeout_us`). The accumulator is
//! reset at each byte boundary via [`LineDriver::begin_byte`].

use crate::device::{Config, Error, ErrorKind, Result};

use super::E2Bus;

/// Poll step while waiting out a clock stretch
const POLL_STEP_US: u32 = 5;

/// Data setup time before SCL rises (minimum per E2 spec)
pub(crate) const DATA_SETUP_US: u32 = 10;

/// Line-detail bit: SCL observed low
pub(crate) const LINE_SCL_LOW: i32 = 0x01;
/// Line-detail bit: SDA observed low
pub(crate) const LINE_SDA_LOW: i32 = 0x02;

/// Bit/byte-level master over two open-drain lines
pub(crate) struct LineDriver<'a, B: E2Bus> {
    bus: &'a mut B,
    cfg: &'a Config,
    elapsed_us: u32,
}

impl<'a, B: E2Bus> LineDriver<'a, B> {
    pub(crate) fn new(bus: &'a mut B, cfg: &'a Config) -> Self {
        Self {
            bus,
            cfg,
            elapsed_us: 0,
        }
    }

    /// Reset the per-byte stretch accumulator
    pub(crate) fn begin_byte(&mut self) {
        self.elapsed_us = 0;
    }

    fn delay_budgeted(&mut self, us: u32) {
        self.bus.delay_us(us);
        self.elapsed_us = self.elapsed_us.saturating_add(us);
    }

    /// Wait for SCL to actually rise, bounded by the per-bit budget only.
    /// Used by START/STOP, which sit outside any byte envelope.
    fn wait_scl_rise(&mut self) -> Result<()> {
        let mut waited_us = 0u32;
        while !self.bus.read_scl() {
            if waited_us >= self.cfg.bit_timeout_us {
                return Err(Error::with_detail(
                    ErrorKind::Timeout,
                    "clock stretch timeout",
                    waited_us as i32,
                ));
            }
            self.bus.delay_us(POLL_STEP_US);
            waited_us += POLL_STEP_US;
        }
        Ok(())
    }

    /// Wait for SCL to rise, bounded by both the per-bit budget and the
    /// per-byte accumulator
    fn wait_scl_rise_budgeted(&mut self) -> Result<()> {
        let mut waited_us = 0u32;
        while !self.bus.read_scl() {
            if waited_us >= self.cfg.bit_timeout_us {
                return Err(Error::with_detail(
                    ErrorKind::Timeout,
                    "clock stretch timeout",
                    waited_us as i32,
                ));
            }
            if self.elapsed_us + POLL_STEP_US > self.cfg.byte_timeout_us {
                return Err(Error::with_detail(
                    ErrorKind::Timeout,
                    "byte timeout",
                    self.elapsed_us as i32,
                ));
            }
            self.delay_budgeted(POLL_STEP_US);
            waited_us += POLL_STEP_US;
        }
        Ok(())
    }

    /// Generate a START condition: SDA falls while SCL is high.
    /// Leaves SCL low for the first data bit.
    pub(crate) fn start(&mut self) -> Result<()> {
        self.bus.set_sda(true);
        self.bus.set_scl(true);
        self.wait_scl_rise()?;
        self.bus.delay_us(self.cfg.start_hold_us);
        self.bus.set_sda(false);
        self.bus.delay_us(self.cfg.start_hold_us);
        self.bus.set_scl(false);
        self.bus.delay_us(self.cfg.clock_low_us);
        Ok(())
    }

    /// Generate a STOP condition: SDA rises while SCL is high.
    /// SCL is already low with proper low time from the last bit.
    pub(crate) fn stop(&mut self) -> Result<()> {
        self.bus.set_sda(false);
        self.bus.delay_us(DATA_SETUP_US);
        self.bus.set_scl(true);
        self.wait_scl_rise()?;
        self.bus.delay_us(self.cfg.stop_hold_us);
        self.bus.set_sda(true);
        self.bus.delay_us(self.cfg.stop_hold_us);
        Ok(())
    }

    fn write_bit(&mut self, bit: bool) -> Result<()> {
        // SCL is already low from the previous bit or START
        self.bus.set_sda(bit);
        self.delay_budgeted(DATA_SETUP_US);
        self.bus.set_scl(true);
        self.wait_scl_rise_budgeted()?;
        self.delay_budgeted(self.cfg.clock_high_us);
        self.bus.set_scl(false);
        self.delay_budgeted(self.cfg.clock_low_us);
        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool> {
        // Release SDA so the slave can drive it
        self.bus.set_sda(true);
        self.delay_budgeted(DATA_SETUP_US);
        self.bus.set_scl(true);
        self.wait_scl_rise_budgeted()?;
        // Sample in the middle of the high phase
        let half_us = self.cfg.clock_high_us / 2;
        self.delay_budgeted(half_us);
        let bit = self.bus.read_sda();
        self.delay_budgeted(self.cfg.clock_high_us - half_us);
        self.bus.set_scl(false);
        self.delay_budgeted(self.cfg.clock_low_us);
        Ok(bit)
    }

    /// Send one byte MSB first
    pub(crate) fn write_byte(&mut self, value: u8) -> Result<()> {
        let mut mask = 0x80u8;
        while mask != 0 {
            self.write_bit(value & mask != 0)?;
            mask >>= 1;
        }
        Ok(())
    }

    /// Receive one byte MSB first
    pub(crate) fn read_byte(&mut self) -> Result<u8> {
        let mut value = 0u8;
        let mut mask = 0x80u8;
        while mask != 0 {
            if self.read_bit()? {
                value |= mask;
            }
            mask >>= 1;
        }
        Ok(value)
    }

    /// Clock the ACK slot and sample it; `true` means the slave pulled SDA
    /// low
    pub(crate) fn read_ack(&mut self) -> Result<bool> {
        let acked = !self.read_bit()?;
        Ok(acked)
    }

    /// Drive the ACK slot: ACK = SDA low, NACK = released. Releases SDA
    /// afterwards.
    pub(crate) fn send_ack(&mut self, ack: bool) -> Result<()> {
        self.bus.set_sda(!ack);
        self.delay_budgeted(DATA_SETUP_US);
        self.bus.set_scl(true);
        self.wait_scl_rise_budgeted()?;
        self.delay_budgeted(self.cfg.clock_high_us);
        self.bus.set_scl(false);
        self.delay_budgeted(self.cfg.clock_low_us);
        self.bus.set_sda(true);
        Ok(())
    }

    /// Nine-clock bus rescue followed by a clean STOP.
    ///
    /// Clocking with SDA released walks a hung slave shifter out of any
    /// partial byte; the STOP returns the bus to idle. Fails `BusStuck` if
    /// SCL never rises during the clocking or if either line still reads
    /// low afterwards.
    pub(crate) fn rescue(&mut self) -> Result<()> {
        self.bus.set_sda(true);
        for _ in 0..crate::device::commands::BUS_RESET_CLOCKS {
            self.bus.set_scl(false);
            self.bus.delay_us(self.cfg.clock_low_us);
            self.bus.set_scl(true);
            // The slave may stretch even these clocks
            let mut waited_us = 0u32;
            while !self.bus.read_scl() && waited_us < self.cfg.bit_timeout_us {
                self.bus.delay_us(POLL_STEP_US);
                waited_us += POLL_STEP_US;
            }
            if waited_us >= self.cfg.bit_timeout_us {
                return Err(Error::with_detail(
                    ErrorKind::BusStuck,
                    "SCL stuck during rescue",
                    LINE_SCL_LOW,
                ));
            }
            self.bus.delay_us(self.cfg.clock_high_us);
        }

        // Leave the bus in a known state with a STOP
        self.bus.set_scl(false);
        self.bus.delay_us(self.cfg.clock_low_us);
        self.bus.set_sda(false);
        self.bus.delay_us(DATA_SETUP_US);
        self.bus.set_scl(true);
        self.bus.delay_us(self.cfg.stop_hold_us);
        self.bus.set_sda(true);
        self.bus.delay_us(self.cfg.stop_hold_us);

        self.check_idle("bus stuck after rescue")
    }

    /// Sample both lines; `BusStuck` with the line-detail bits if either is
    /// low
    pub(crate) fn check_idle(&mut self, msg: &'static str) -> Result<()> {
        let scl_high = self.bus.read_scl();
        let sda_high = self.bus.read_sda();
        if scl_high && sda_high {
            return Ok(());
        }
        let mut detail = 0;
        if !scl_high {
            detail |= LINE_SCL_LOW;
        }
        if !sda_high {
            detail |= LINE_SDA_LOW;
        }
        Err(Error::with_detail(ErrorKind::BusStuck, msg, detail))
    }
}
