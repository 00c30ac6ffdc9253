//! EE871 command table
//!
//! Control-byte construction, main-command nibbles, the custom memory map,
//! identity constants, and the bitfield registers the device exposes.
//!
//! Control byte layout: `[main:4 | addr:3 | rw:1]`.

use bitflags::bitflags;

// ============================================================================
// Control Byte Construction
// ============================================================================

/// Highest valid E2 device address
pub const DEVICE_ADDRESS_MAX: u8 = 7;

const RW_READ: u8 = 0x01;
const RW_WRITE: u8 = 0x00;
const ADDR_SHIFT: u8 = 1;
const MAIN_SHIFT: u8 = 4;

/// Build a control byte from main-command nibble, device address, and
/// direction
pub const fn control_byte(main: u8, device_address: u8, read: bool) -> u8 {
    (main << MAIN_SHIFT)
        | ((device_address & 0x07) << ADDR_SHIFT)
        | if read { RW_READ } else { RW_WRITE }
}

/// Build a read control byte
pub const fn control_read(main: u8, device_address: u8) -> u8 {
    control_byte(main, device_address, true)
}

/// Build a write control byte
pub const fn control_write(main: u8, device_address: u8) -> u8 {
    control_byte(main, device_address, false)
}

// ============================================================================
// Main Command Nibbles (b7..b4)
// ============================================================================

/// Read: sensor type low byte (0x11)
pub const MAIN_TYPE_LO: u8 = 0x1;
/// Write: direct custom memory byte (0x10)
pub const MAIN_CUSTOM_WRITE: u8 = 0x1;
/// Read: sensor subtype (0x21)
pub const MAIN_TYPE_SUB: u8 = 0x2;
/// Read: available measurements bitfield (0x31)
pub const MAIN_AVAIL_MEAS: u8 = 0x3;
/// Read: sensor type high byte (0x41)
pub const MAIN_TYPE_HI: u8 = 0x4;
/// Read: pointer-based custom read (0x51), Write: pointer set (0x50)
pub const MAIN_CUSTOM_PTR: u8 = 0x5;
/// Read: status byte (0x71)
pub const MAIN_STATUS: u8 = 0x7;
/// Measurement value 1, low/high
pub const MAIN_MV1_LO: u8 = 0x8;
pub const MAIN_MV1_HI: u8 = 0x9;
/// Measurement value 2, low/high
pub const MAIN_MV2_LO: u8 = 0xA;
pub const MAIN_MV2_HI: u8 = 0xB;
/// Measurement value 3 (CO2 fast response), low/high
pub const MAIN_MV3_LO: u8 = 0xC;
pub const MAIN_MV3_HI: u8 = 0xD;
/// Measurement value 4 (CO2 11-sample average), low/high
pub const MAIN_MV4_LO: u8 = 0xE;
pub const MAIN_MV4_HI: u8 = 0xF;

/// Highest valid main-command nibble
pub const MAIN_COMMAND_MAX: u8 = 0x0F;

// ============================================================================
// Device Identity
// ============================================================================

/// EE871 sensor group (type low 0x67, type high 0x03)
pub const SENSOR_GROUP_ID: u16 = 0x0367;
/// EE871 sensor subgroup
pub const SENSOR_SUBGROUP_ID: u8 = 0x09;

// ============================================================================
// Custom Memory Map (0x00..0xFF)
// ============================================================================

/// Size of the device's 8-bit-addressed custom memory
pub const CUSTOM_MEMORY_SIZE: usize = 256;

pub const CUSTOM_FW_VERSION_MAIN: u8 = 0x00;
pub const CUSTOM_FW_VERSION_SUB: u8 = 0x01;
pub const CUSTOM_E2_SPEC_VERSION: u8 = 0x02;

pub const CUSTOM_OPERATING_FUNCTIONS: u8 = 0x07;
pub const CUSTOM_OPERATING_MODE_SUPPORT: u8 = 0x08;
pub const CUSTOM_SPECIAL_FEATURES: u8 = 0x09;

// CO2 calibration (signed offset, unsigned gain and points)
pub const CUSTOM_CO2_OFFSET_L: u8 = 0x58;
pub const CUSTOM_CO2_OFFSET_H: u8 = 0x59;
pub const CUSTOM_CO2_GAIN_L: u8 = 0x5A;
pub const CUSTOM_CO2_GAIN_H: u8 = 0x5B;
pub const CUSTOM_CO2_POINT_L_L: u8 = 0x5C;

pub const CUSTOM_SERIAL_START: u8 = 0xA0;
/// Serial number length in bytes
pub const SERIAL_LEN: usize = 16;
pub const CUSTOM_PART_NAME_START: u8 = 0xB0;
/// Part name length in bytes
pub const PART_NAME_LEN: usize = 16;

pub const CUSTOM_BUS_ADDRESS: u8 = 0xC0;
pub const CUSTOM_ERROR_CODE: u8 = 0xC1;

pub const CUSTOM_INTERVAL_L: u8 = 0xC6;
pub const CUSTOM_INTERVAL_H: u8 = 0xC7;
pub const CUSTOM_CO2_INTERVAL_FACTOR: u8 = 0xCB;

pub const CUSTOM_FILTER_CO2: u8 = 0xD3;
pub const CUSTOM_OPERATING_MODE: u8 = 0xD8;
pub const CUSTOM_AUTO_ADJUST: u8 = 0xD9;

// ============================================================================
// Range Limits
// ============================================================================

/// Minimum global measurement interval, 0.1 s units (15 s)
pub const INTERVAL_MIN_DECISEC: u16 = 150;
/// Maximum global measurement interval, 0.1 s units (3600 s)
pub const INTERVAL_MAX_DECISEC: u16 = 36000;
/// Highest bus address the device accepts
pub const BUS_ADDRESS_MAX: u8 = 7;

/// Clock pulses with SDA released needed to reset a hung slave shifter
pub const BUS_RESET_CLOCKS: u8 = 9;

/// Auto-adjust register: bit 0 set while an adjustment is running
pub const AUTO_ADJUST_RUNNING_MASK: u8 = 0x01;

// ============================================================================
// Bitfield Registers
// ============================================================================

bitflags! {
    /// Available-measurements register (main command 0x3)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Measurements: u8 {
        /// CO2 measurement present
        const CO2 = 0x08;
    }
}

bitflags! {
    /// Status register (main command 0x7)
    ///
    /// Reading the status byte may also trigger a new measurement on
    /// devices configured with a long interval.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SensorStatus: u8 {
        /// CO2 measurement error latch
        const CO2_ERROR = 0x08;
    }
}

bitflags! {
    /// Operating-functions register (custom memory 0x07)
    ///
    /// Cached once during `begin`; gates the optional operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OperatingFunctions: u8 {
        const SERIAL_NUMBER = 0x01;
        const PART_NAME = 0x02;
        const ADDRESS_CONFIG = 0x04;
        const GLOBAL_INTERVAL = 0x10;
        const SPECIFIC_INTERVAL = 0x20;
        const FILTER_CONFIG = 0x40;
        const ERROR_CODE = 0x80;
    }
}

bitflags! {
    /// Operating-mode support register (custom memory 0x08)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OperatingModeSupport: u8 {
        const LOW_POWER = 0x01;
        const E2_PRIORITY = 0x02;
    }
}

bitflags! {
    /// Special-features register (custom memory 0x09)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SpecialFeatures: u8 {
        const AUTO_ADJUST = 0x01;
    }
}

bitflags! {
    /// Operating-mode register (custom memory 0xD8)
    ///
    /// bit 0: 0 = free-running, 1 = low power;
    /// bit 1: 0 = measurement priority, 1 = E2 priority
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OperatingMode: u8 {
        const LOW_POWER = 0x01;
        const E2_PRIORITY = 0x02;
    }
}
