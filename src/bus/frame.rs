//! E2 transaction recipes
//!
//! A read transaction moves one data byte plus the PEC from the slave; a
//! write transaction moves control, address, data, and PEC to the slave
//! with an ACK after each byte. Any failure aborts with a best-effort STOP
//! so the bus is left in a defined state, then propagates with its
//! originating kind.
//!
//! PEC: low byte of the unsigned sum of every byte the master transmits
//! plus every data byte the slave transmits, excluding the PEC itself.

use crate::device::{Config, Error, ErrorKind, Result};

use super::bitbang::LineDriver;
use super::E2Bus;

/// NACK detail: which byte of the transaction the slave refused
pub(crate) const STAGE_CONTROL: i32 = 0;
pub(crate) const STAGE_ADDRESS: i32 = 1;
pub(crate) const STAGE_DATA: i32 = 2;
pub(crate) const STAGE_PEC: i32 = 3;

/// Expected PEC for a read transaction
pub(crate) fn pec_read(control: u8, data: u8) -> u8 {
    control.wrapping_add(data)
}

/// PEC for a write transaction
pub(crate) fn pec_write(control: u8, address: u8, data: u8) -> u8 {
    control.wrapping_add(address).wrapping_add(data)
}

/// Perform one read transaction: START, control byte, data byte (ACKed),
/// PEC byte (NACKed), STOP, then verify the PEC.
pub(crate) fn read_transaction<B: E2Bus>(bus: &mut B, cfg: &Config, control: u8) -> Result<u8> {
    let mut line = LineDriver::new(bus, cfg);
    line.start()?;
    match read_payload(&mut line, control) {
        Ok((data, pec)) => {
            line.stop()?;
            let expected = pec_read(control, data);
            if pec != expected {
                return Err(Error::with_detail(
                    ErrorKind::PecMismatch,
                    "PEC mismatch",
                    i32::from(pec),
                ));
            }
            Ok(data)
        }
        Err(err) => {
            let _ = line.stop();
            Err(err)
        }
    }
}

fn read_payload<B: E2Bus>(line: &mut LineDriver<'_, B>, control: u8) -> Result<(u8, u8)> {
    line.begin_byte();
    line.write_byte(control)?;
    if !line.read_ack()? {
        return Err(Error::with_detail(
            ErrorKind::Nack,
            "control byte refused",
            STAGE_CONTROL,
        ));
    }

    line.begin_byte();
    let data = line.read_byte()?;
    line.send_ack(true)?;

    line.begin_byte();
    let pec = line.read_byte()?;
    // Master always NACKs the last byte of a read
    line.send_ack(false)?;

    Ok((data, pec))
}

/// Perform one write transaction: START, then control, address, data, and
/// PEC, each acknowledged by the slave, then STOP.
pub(crate) fn write_transaction<B: E2Bus>(
    bus: &mut B,
    cfg: &Config,
    control: u8,
    address: u8,
    data: u8,
) -> Result<()> {
    let mut line = LineDriver::new(bus, cfg);
    line.start()?;
    match write_payload(&mut line, control, address, data) {
        Ok(()) => line.stop(),
        Err(err) => {
            let _ = line.stop();
            Err(err)
        }
    }
}

fn write_payload<B: E2Bus>(
    line: &mut LineDriver<'_, B>,
    control: u8,
    address: u8,
    data: u8,
) -> Result<()> {
    send_acked(line, control, "control byte refused", STAGE_CONTROL)?;
    send_acked(line, address, "address byte refused", STAGE_ADDRESS)?;
    send_acked(line, data, "data byte refused", STAGE_DATA)?;
    let pec = pec_write(control, address, data);
    send_acked(line, pec, "PEC byte refused", STAGE_PEC)
}

fn send_acked<B: E2Bus>(
    line: &mut LineDriver<'_, B>,
    value: u8,
    msg: &'static str,
    stage: i32,
) -> Result<()> {
    line.begin_byte();
    line.write_byte(value)?;
    if !line.read_ack()? {
        return Err(Error::with_detail(ErrorKind::Nack, msg, stage));
    }
    Ok(())
}
