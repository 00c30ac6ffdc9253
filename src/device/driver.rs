//! EE871 device driver
//!
//! Managed synchronous driver over the bit-banged E2 master. Operations
//! come in two flavours:
//!
//! - *tracked*: routed through the health wrapper, which maintains the
//!   driver state machine and lifetime counters. All normal device
//!   operations are tracked.
//! - *raw*: diagnostic and recovery paths (`probe`, `bus_reset`,
//!   `check_bus_idle`) that never touch state or counters.
//!
//! The health wrapper is the only place driver state and counters change:
//! a success resets the consecutive-failure count and returns the driver to
//! READY; a failure moves it to DEGRADED, or OFFLINE once the configured
//! threshold of consecutive failures is reached.

use crate::bus::bitbang::LineDriver;
use crate::bus::{frame, E2Bus};

use super::commands::{
    control_read, control_write, AUTO_ADJUST_RUNNING_MASK, BUS_ADDRESS_MAX, CUSTOM_AUTO_ADJUST,
    CUSTOM_BUS_ADDRESS, CUSTOM_CO2_GAIN_H, CUSTOM_CO2_GAIN_L, CUSTOM_CO2_INTERVAL_FACTOR,
    CUSTOM_CO2_OFFSET_H, CUSTOM_CO2_OFFSET_L, CUSTOM_CO2_POINT_L_L, CUSTOM_E2_SPEC_VERSION,
    CUSTOM_ERROR_CODE, CUSTOM_FILTER_CO2, CUSTOM_FW_VERSION_MAIN, CUSTOM_FW_VERSION_SUB,
    CUSTOM_INTERVAL_H, CUSTOM_INTERVAL_L, CUSTOM_MEMORY_SIZE, CUSTOM_OPERATING_FUNCTIONS,
    CUSTOM_OPERATING_MODE, CUSTOM_OPERATING_MODE_SUPPORT, CUSTOM_PART_NAME_START,
    CUSTOM_SERIAL_START, CUSTOM_SPECIAL_FEATURES, INTERVAL_MAX_DECISEC, INTERVAL_MIN_DECISEC,
    MAIN_AVAIL_MEAS, MAIN_COMMAND_MAX, MAIN_CUSTOM_PTR, MAIN_CUSTOM_WRITE, MAIN_MV3_HI,
    MAIN_MV3_LO, MAIN_MV4_HI, MAIN_MV4_LO, MAIN_STATUS, MAIN_TYPE_HI, MAIN_TYPE_LO, MAIN_TYPE_SUB,
    Measurements, OperatingFunctions, OperatingMode, OperatingModeSupport, SensorStatus,
    SpecialFeatures, PART_NAME_LEN, SENSOR_GROUP_ID, SENSOR_SUBGROUP_ID, SERIAL_LEN,
};
use super::config::Config;
use super::status::{Error, ErrorKind, Result};

/// Driver state for health monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverState {
    /// `begin()` not called or `end()` called
    Uninit,
    /// Operational, zero consecutive failures
    Ready,
    /// At least one consecutive failure, below the offline threshold
    Degraded,
    /// Consecutive failures reached the offline threshold
    Offline,
}

/// EE871 driver
///
/// Owns the bus access for its lifetime; [`Ee871Driver::release`] returns
/// it. Exactly one driver per physical bus.
pub struct Ee871Driver<B: E2Bus> {
    bus: B,
    config: Config,
    initialized: bool,
    state: DriverState,
    now_ms: u32,

    // Health counters
    last_ok_ms: u32,
    last_error_ms: u32,
    last_error: Option<Error>,
    consecutive_failures: u8,
    total_failures: u32,
    total_success: u32,

    // Feature flags cached once during begin
    operating_functions: OperatingFunctions,
    operating_mode_support: OperatingModeSupport,
    special_features: SpecialFeatures,
}

impl<B: E2Bus> Ee871Driver<B> {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create an uninitialized driver; call [`Ee871Driver::begin`] before
    /// use
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            config: Config::default(),
            initialized: false,
            state: DriverState::Uninit,
            now_ms: 0,
            last_ok_ms: 0,
            last_error_ms: 0,
            last_error: None,
            consecutive_failures: 0,
            total_failures: 0,
            total_success: 0,
            operating_functions: OperatingFunctions::empty(),
            operating_mode_support: OperatingModeSupport::empty(),
            special_features: SpecialFeatures::empty(),
        }
    }

    /// Initialize the driver: validate the configuration, rescue the bus if
    /// a line is held low, verify the device identity, and cache the
    /// feature flags.
    ///
    /// A feature-cache failure is non-fatal; the flags stay clear and the
    /// gated operations report `NotSupported` for the session.
    pub fn begin(&mut self, config: Config) -> Result<()> {
        if self.initialized {
            return Err(Error::new(
                ErrorKind::AlreadyInitialized,
                "call end() first",
            ));
        }
        config.validate()?;

        self.config = config;
        self.state = DriverState::Uninit;
        self.now_ms = 0;
        self.last_ok_ms = 0;
        self.last_error_ms = 0;
        self.last_error = None;
        self.consecutive_failures = 0;
        self.total_failures = 0;
        self.total_success = 0;
        self.operating_functions = OperatingFunctions::empty();
        self.operating_mode_support = OperatingModeSupport::empty();
        self.special_features = SpecialFeatures::empty();

        // A held line at entry gets one rescue attempt before we give up
        if !self.bus.read_scl() || !self.bus.read_sda() {
            LineDriver::new(&mut self.bus, &self.config).rescue()?;
        }

        self.probe_group_raw()?;

        // Non-fatal: an empty cache just leaves the gated operations
        // reporting NotSupported
        if self.cache_features().is_err() {
            crate::log_warn!("feature cache read failed; optional features disabled");
        }

        self.initialized = true;
        self.state = DriverState::Ready;
        crate::log_info!("EE871 initialized");
        Ok(())
    }

    /// Store the caller's clock for subsequent health timestamps. Does not
    /// touch the bus.
    pub fn tick(&mut self, now_ms: u32) {
        self.now_ms = now_ms;
    }

    /// Shut the driver down. Lifetime counters stay readable; the next
    /// `begin` resets them.
    pub fn end(&mut self) {
        self.initialized = false;
        self.state = DriverState::Uninit;
    }

    /// Return the bus access
    pub fn release(self) -> B {
        self.bus
    }

    /// Borrow the underlying bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutably borrow the underlying bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Check the device is present, without health tracking.
    /// Returns the group identifier.
    pub fn probe(&mut self) -> Result<u16> {
        self.ensure_initialized()?;
        self.probe_group_raw()
    }

    /// Attempt to recover from a degraded or offline state: run the bus
    /// rescue (ignoring its outcome), then perform a tracked identity read
    /// and return it.
    pub fn recover(&mut self) -> Result<u16> {
        self.ensure_initialized()?;
        crate::log_debug!("recover: bus rescue + identity read");
        let _ = LineDriver::new(&mut self.bus, &self.config).rescue();
        self.read_group()
    }

    /// Reset the slave shifter by clocking with SDA released, then check
    /// both lines are free. Raw: no health tracking.
    pub fn bus_reset(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        LineDriver::new(&mut self.bus, &self.config).rescue()
    }

    /// `Ok` iff both lines currently read high. `BusStuck` detail bit 0 set
    /// = SCL low, bit 1 set = SDA low. Raw: no health tracking.
    pub fn check_bus_idle(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        LineDriver::new(&mut self.bus, &self.config).check_idle("bus not idle")
    }

    // =========================================================================
    // Driver State / Health
    // =========================================================================

    /// Current driver state
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// `true` while the driver is READY or DEGRADED
    pub fn is_online(&self) -> bool {
        matches!(self.state, DriverState::Ready | DriverState::Degraded)
    }

    /// Tick value at the last successful tracked operation
    pub fn last_ok_ms(&self) -> u32 {
        self.last_ok_ms
    }

    /// Tick value at the last failed tracked operation
    pub fn last_error_ms(&self) -> u32 {
        self.last_error_ms
    }

    /// Most recent tracked failure
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    /// Consecutive tracked failures since the last success (saturating)
    pub fn consecutive_failures(&self) -> u8 {
        self.consecutive_failures
    }

    /// Lifetime tracked-failure count (saturating)
    pub fn total_failures(&self) -> u32 {
        self.total_failures
    }

    /// Lifetime tracked-success count (saturating)
    pub fn total_success(&self) -> u32 {
        self.total_success
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Cached Feature Flags
    // =========================================================================

    /// Operating functions cached at begin
    pub fn operating_functions(&self) -> OperatingFunctions {
        self.operating_functions
    }

    /// Operating-mode support cached at begin
    pub fn operating_mode_support(&self) -> OperatingModeSupport {
        self.operating_mode_support
    }

    /// Special features cached at begin
    pub fn special_features(&self) -> SpecialFeatures {
        self.special_features
    }

    // =========================================================================
    // E2 Protocol Helpers
    // =========================================================================

    /// Read one byte addressed by a main-command nibble
    pub fn read_control_byte(&mut self, main: u8) -> Result<u8> {
        self.ensure_initialized()?;
        if main > MAIN_COMMAND_MAX {
            return Err(Error::with_detail(
                ErrorKind::InvalidParam,
                "invalid main command",
                i32::from(main),
            ));
        }
        let control = control_read(main, self.config.device_address);
        self.read_control_tracked(control)
    }

    /// Read a 16-bit value from a low/high nibble pair, low byte first (the
    /// device latches the pair on the low read)
    pub fn read_u16(&mut self, main_low: u8, main_high: u8) -> Result<u16> {
        let low = self.read_control_byte(main_low)?;
        let high = self.read_control_byte(main_high)?;
        Ok(u16::from_le_bytes([low, high]))
    }

    /// Seat the device's custom-memory pointer (write 0x50)
    pub fn set_custom_pointer(&mut self, address: u16) -> Result<()> {
        self.ensure_initialized()?;
        if address > 0xFF {
            return Err(Error::with_detail(
                ErrorKind::OutOfRange,
                "custom pointer above 0xFF",
                i32::from(address),
            ));
        }
        let control = control_write(MAIN_CUSTOM_PTR, self.config.device_address);
        let [low, high] = address.to_le_bytes();
        self.write_command_tracked(control, high, low)
    }

    /// Read one custom-memory byte
    pub fn custom_read(&mut self, address: u8) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.custom_read_block(address, &mut byte)?;
        Ok(byte[0])
    }

    /// Read a custom-memory block. The pointer is seated once; the device
    /// auto-increments it between the pointer-based reads.
    pub fn custom_read_block(&mut self, address: u8, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(Error::new(ErrorKind::InvalidParam, "empty buffer"));
        }
        if buf.len() > CUSTOM_MEMORY_SIZE - usize::from(address) {
            return Err(Error::new(
                ErrorKind::OutOfRange,
                "read exceeds custom memory map",
            ));
        }
        self.set_custom_pointer(u16::from(address))?;

        let control = control_read(MAIN_CUSTOM_PTR, self.config.device_address);
        for slot in buf.iter_mut() {
            *slot = self.read_control_tracked(control)?;
        }
        Ok(())
    }

    /// Write one custom-memory byte (0x10), wait out the flash commit, and
    /// read it back to verify.
    ///
    /// Writes to the interval pair (0xC6/0xC7) are rerouted to
    /// [`Ee871Driver::write_measurement_interval`] so the two bytes are
    /// always committed together.
    pub fn custom_write(&mut self, address: u8, value: u8) -> Result<()> {
        self.ensure_initialized()?;
        if address == CUSTOM_INTERVAL_L || address == CUSTOM_INTERVAL_H {
            let other_address = if address == CUSTOM_INTERVAL_L {
                CUSTOM_INTERVAL_H
            } else {
                CUSTOM_INTERVAL_L
            };
            let other = self.custom_read(other_address)?;
            let interval = if address == CUSTOM_INTERVAL_L {
                u16::from_le_bytes([value, other])
            } else {
                u16::from_le_bytes([other, value])
            };
            return self.write_measurement_interval(interval);
        }

        let control = control_write(MAIN_CUSTOM_WRITE, self.config.device_address);
        self.write_command_tracked(control, address, value)?;

        self.sleep_ms(self.config.write_delay_ms);

        let verify = self.custom_read(address)?;
        if verify != value {
            return Err(Error::with_detail(
                ErrorKind::E2Error,
                "write verify failed",
                i32::from(verify),
            ));
        }
        Ok(())
    }

    /// Write the global measurement interval (0.1 s units, 150..=36000),
    /// commit both bytes with a single pair-flash wait, and verify the
    /// read-back.
    pub fn write_measurement_interval(&mut self, interval_decisec: u16) -> Result<()> {
        self.ensure_initialized()?;
        if !self.has_global_interval() {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "global interval not supported",
            ));
        }
        if !(INTERVAL_MIN_DECISEC..=INTERVAL_MAX_DECISEC).contains(&interval_decisec) {
            return Err(Error::with_detail(
                ErrorKind::OutOfRange,
                "interval must be 150-36000 (15-3600 s)",
                i32::from(interval_decisec),
            ));
        }

        let control = control_write(MAIN_CUSTOM_WRITE, self.config.device_address);
        let [low, high] = interval_decisec.to_le_bytes();
        self.write_command_tracked(control, CUSTOM_INTERVAL_L, low)?;
        self.write_command_tracked(control, CUSTOM_INTERVAL_H, high)?;

        self.sleep_ms(self.config.interval_write_delay_ms);

        let verify_low = self.custom_read(CUSTOM_INTERVAL_L)?;
        let verify_high = self.custom_read(CUSTOM_INTERVAL_H)?;
        let verify = u16::from_le_bytes([verify_low, verify_high]);
        if verify != interval_decisec {
            return Err(Error::with_detail(
                ErrorKind::E2Error,
                "interval verify failed",
                i32::from(verify),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Identification
    // =========================================================================

    /// Read and check the sensor group identifier (tracked)
    pub fn read_group(&mut self) -> Result<u16> {
        let group = self.read_u16(MAIN_TYPE_LO, MAIN_TYPE_HI)?;
        if group != SENSOR_GROUP_ID {
            return Err(Error::with_detail(
                ErrorKind::DeviceNotFound,
                "unexpected group id",
                i32::from(group),
            ));
        }
        Ok(group)
    }

    /// Read and check the sensor subgroup identifier
    pub fn read_subgroup(&mut self) -> Result<u8> {
        let subgroup = self.read_control_byte(MAIN_TYPE_SUB)?;
        if subgroup != SENSOR_SUBGROUP_ID {
            return Err(Error::with_detail(
                ErrorKind::DeviceNotFound,
                "unexpected subgroup id",
                i32::from(subgroup),
            ));
        }
        Ok(subgroup)
    }

    /// Read the available-measurements bitfield
    pub fn read_available_measurements(&mut self) -> Result<Measurements> {
        let bits = self.read_control_byte(MAIN_AVAIL_MEAS)?;
        Ok(Measurements::from_bits_retain(bits))
    }

    // =========================================================================
    // Status / Measurements
    // =========================================================================

    /// Read the status byte. On devices with a long interval this also
    /// triggers a new measurement.
    pub fn read_status(&mut self) -> Result<SensorStatus> {
        let bits = self.read_control_byte(MAIN_STATUS)?;
        Ok(SensorStatus::from_bits_retain(bits))
    }

    /// Read the device error code (0xC1); valid when the status CO2-error
    /// bit is set
    pub fn read_error_code(&mut self) -> Result<u8> {
        if !self.has_error_code() {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "error code not supported",
            ));
        }
        self.custom_read(CUSTOM_ERROR_CODE)
    }

    /// CO2 fast response in ppm (MV3, unfiltered)
    pub fn read_co2_fast(&mut self) -> Result<u16> {
        self.read_u16(MAIN_MV3_LO, MAIN_MV3_HI)
    }

    /// CO2 averaged value in ppm (MV4, 11-sample moving average)
    pub fn read_co2_average(&mut self) -> Result<u16> {
        self.read_u16(MAIN_MV4_LO, MAIN_MV4_HI)
    }

    // =========================================================================
    // Firmware / Spec Version
    // =========================================================================

    /// Firmware version as (main, sub)
    pub fn read_firmware_version(&mut self) -> Result<(u8, u8)> {
        let main = self.custom_read(CUSTOM_FW_VERSION_MAIN)?;
        let sub = self.custom_read(CUSTOM_FW_VERSION_SUB)?;
        Ok((main, sub))
    }

    /// E2 specification version implemented by the device
    pub fn read_e2_spec_version(&mut self) -> Result<u8> {
        self.custom_read(CUSTOM_E2_SPEC_VERSION)
    }

    // =========================================================================
    // Feature Discovery (fresh reads, not the begin-time cache)
    // =========================================================================

    /// Read the operating-functions register (0x07)
    pub fn read_operating_functions(&mut self) -> Result<OperatingFunctions> {
        let bits = self.custom_read(CUSTOM_OPERATING_FUNCTIONS)?;
        Ok(OperatingFunctions::from_bits_retain(bits))
    }

    /// Read the operating-mode support register (0x08)
    pub fn read_operating_mode_support(&mut self) -> Result<OperatingModeSupport> {
        let bits = self.custom_read(CUSTOM_OPERATING_MODE_SUPPORT)?;
        Ok(OperatingModeSupport::from_bits_retain(bits))
    }

    /// Read the special-features register (0x09)
    pub fn read_special_features(&mut self) -> Result<SpecialFeatures> {
        let bits = self.custom_read(CUSTOM_SPECIAL_FEATURES)?;
        Ok(SpecialFeatures::from_bits_retain(bits))
    }

    // =========================================================================
    // Identity Strings
    // =========================================================================

    /// Read the 16-byte serial number (0xA0-0xAF)
    pub fn read_serial_number(&mut self, buf: &mut [u8; SERIAL_LEN]) -> Result<()> {
        if !self.has_serial_number() {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "serial number not supported",
            ));
        }
        self.custom_read_block(CUSTOM_SERIAL_START, buf)
    }

    /// Read the 16-byte part name (0xB0-0xBF)
    pub fn read_part_name(&mut self, buf: &mut [u8; PART_NAME_LEN]) -> Result<()> {
        if !self.has_part_name() {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "part name not supported",
            ));
        }
        self.custom_read_block(CUSTOM_PART_NAME_START, buf)
    }

    /// Write the 16-byte part name as a sequence of verified single-byte
    /// writes
    pub fn write_part_name(&mut self, name: &[u8; PART_NAME_LEN]) -> Result<()> {
        if !self.has_part_name() {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "part name not supported",
            ));
        }
        for (offset, &byte) in name.iter().enumerate() {
            self.custom_write(CUSTOM_PART_NAME_START + offset as u8, byte)?;
        }
        Ok(())
    }

    // =========================================================================
    // Bus Address
    // =========================================================================

    /// Read the configured bus address (0xC0). Always readable; only the
    /// write is feature-gated.
    pub fn read_bus_address(&mut self) -> Result<u8> {
        self.custom_read(CUSTOM_BUS_ADDRESS)
    }

    /// Write the bus address (0xC0). Takes effect after a power cycle.
    pub fn write_bus_address(&mut self, address: u8) -> Result<()> {
        if !self.has_address_config() {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "address config not supported",
            ));
        }
        if address > BUS_ADDRESS_MAX {
            return Err(Error::with_detail(
                ErrorKind::OutOfRange,
                "address must be 0-7",
                i32::from(address),
            ));
        }
        self.custom_write(CUSTOM_BUS_ADDRESS, address)
    }

    // =========================================================================
    // Measurement Interval
    // =========================================================================

    /// Read the global measurement interval in 0.1 s units
    pub fn read_measurement_interval(&mut self) -> Result<u16> {
        let low = self.custom_read(CUSTOM_INTERVAL_L)?;
        let high = self.custom_read(CUSTOM_INTERVAL_H)?;
        Ok(u16::from_le_bytes([low, high]))
    }

    /// Read the CO2-specific interval factor (0xCB): positive multiplies,
    /// negative divides
    pub fn read_co2_interval_factor(&mut self) -> Result<i8> {
        let raw = self.custom_read(CUSTOM_CO2_INTERVAL_FACTOR)?;
        Ok(raw as i8)
    }

    /// Write the CO2-specific interval factor (0xCB)
    pub fn write_co2_interval_factor(&mut self, factor: i8) -> Result<()> {
        if !self.has_specific_interval() {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "specific interval not supported",
            ));
        }
        self.custom_write(CUSTOM_CO2_INTERVAL_FACTOR, factor as u8)
    }

    // =========================================================================
    // Filter / Operating Mode
    // =========================================================================

    /// Read the CO2 filter setting (0xD3)
    pub fn read_co2_filter(&mut self) -> Result<u8> {
        self.custom_read(CUSTOM_FILTER_CO2)
    }

    /// Write the CO2 filter setting (0xD3)
    pub fn write_co2_filter(&mut self, filter: u8) -> Result<()> {
        if !self.has_filter_config() {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "filter config not supported",
            ));
        }
        self.custom_write(CUSTOM_FILTER_CO2, filter)
    }

    /// Read the operating mode (0xD8)
    pub fn read_operating_mode(&mut self) -> Result<OperatingMode> {
        let bits = self.custom_read(CUSTOM_OPERATING_MODE)?;
        Ok(OperatingMode::from_bits_retain(bits))
    }

    /// Write the operating mode (0xD8). Each mode bit is gated by the
    /// device's support flag; bits above the defined two are rejected.
    pub fn write_operating_mode(&mut self, mode: OperatingMode) -> Result<()> {
        if mode.contains(OperatingMode::LOW_POWER) && !self.has_low_power_mode() {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "low power mode not supported",
            ));
        }
        if mode.contains(OperatingMode::E2_PRIORITY) && !self.has_e2_priority() {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "E2 priority not supported",
            ));
        }
        if mode.bits() > OperatingMode::all().bits() {
            return Err(Error::with_detail(
                ErrorKind::OutOfRange,
                "invalid mode bits",
                i32::from(mode.bits()),
            ));
        }
        self.custom_write(CUSTOM_OPERATING_MODE, mode.bits())
    }

    // =========================================================================
    // Auto Adjustment
    // =========================================================================

    /// `true` while an auto adjustment is running (0xD9 bit 0)
    pub fn read_auto_adjust_status(&mut self) -> Result<bool> {
        let raw = self.custom_read(CUSTOM_AUTO_ADJUST)?;
        Ok(raw & AUTO_ADJUST_RUNNING_MASK != 0)
    }

    /// Start an auto adjustment. Cannot be stopped once started; the device
    /// answers 0x55 on measurements for its ~5 minute duration.
    pub fn start_auto_adjust(&mut self) -> Result<()> {
        if !self.has_auto_adjust() {
            return Err(Error::new(
                ErrorKind::NotSupported,
                "auto adjust not supported",
            ));
        }
        self.custom_write(CUSTOM_AUTO_ADJUST, 0x01)
    }

    // =========================================================================
    // Calibration (Advanced)
    // =========================================================================

    /// Read the CO2 offset in ppm (signed)
    pub fn read_co2_offset(&mut self) -> Result<i16> {
        let low = self.custom_read(CUSTOM_CO2_OFFSET_L)?;
        let high = self.custom_read(CUSTOM_CO2_OFFSET_H)?;
        Ok(i16::from_le_bytes([low, high]))
    }

    /// Write the CO2 offset in ppm (signed)
    pub fn write_co2_offset(&mut self, offset: i16) -> Result<()> {
        let [low, high] = offset.to_le_bytes();
        self.custom_write(CUSTOM_CO2_OFFSET_L, low)?;
        self.custom_write(CUSTOM_CO2_OFFSET_H, high)
    }

    /// Read the CO2 gain (effective gain = value / 32768)
    pub fn read_co2_gain(&mut self) -> Result<u16> {
        let low = self.custom_read(CUSTOM_CO2_GAIN_L)?;
        let high = self.custom_read(CUSTOM_CO2_GAIN_H)?;
        Ok(u16::from_le_bytes([low, high]))
    }

    /// Write the CO2 gain (effective gain = value / 32768)
    pub fn write_co2_gain(&mut self, gain: u16) -> Result<()> {
        let [low, high] = gain.to_le_bytes();
        self.custom_write(CUSTOM_CO2_GAIN_L, low)?;
        self.custom_write(CUSTOM_CO2_GAIN_H, high)
    }

    /// Read the last calibration points as (lower, upper) in ppm
    pub fn read_co2_cal_points(&mut self) -> Result<(u16, u16)> {
        let mut block = [0u8; 4];
        self.custom_read_block(CUSTOM_CO2_POINT_L_L, &mut block)?;
        let lower = u16::from_le_bytes([block[0], block[1]]);
        let upper = u16::from_le_bytes([block[2], block[3]]);
        Ok((lower, upper))
    }

    // =========================================================================
    // Tracked/Raw Transport Wrappers
    // =========================================================================

    fn read_control_raw(&mut self, control: u8) -> Result<u8> {
        frame::read_transaction(&mut self.bus, &self.config, control)
    }

    fn read_control_tracked(&mut self, control: u8) -> Result<u8> {
        let result = frame::read_transaction(&mut self.bus, &self.config, control);
        self.update_health(result)
    }

    fn write_command_raw(&mut self, control: u8, address: u8, data: u8) -> Result<()> {
        frame::write_transaction(&mut self.bus, &self.config, control, address, data)
    }

    fn write_command_tracked(&mut self, control: u8, address: u8, data: u8) -> Result<()> {
        let result = frame::write_transaction(&mut self.bus, &self.config, control, address, data);
        self.update_health(result)
    }

    // =========================================================================
    // Health Management
    // =========================================================================

    /// The single update point for driver state and counters; called only
    /// from the tracked transport wrappers.
    fn update_health<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.last_ok_ms = self.now_ms;
                self.consecutive_failures = 0;
                self.total_success = self.total_success.saturating_add(1);
                self.state = DriverState::Ready;
                Ok(value)
            }
            Err(err) => {
                self.last_error_ms = self.now_ms;
                self.last_error = Some(err);
                self.total_failures = self.total_failures.saturating_add(1);
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.state = if self.consecutive_failures >= self.config.offline_threshold {
                    DriverState::Offline
                } else {
                    DriverState::Degraded
                };
                Err(err)
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(Error::new(
                ErrorKind::NotInitialized,
                "driver not initialized",
            ));
        }
        Ok(())
    }

    /// Identity read used by both `begin` and `probe`; raw on purpose so
    /// diagnostics never move the health state.
    fn probe_group_raw(&mut self) -> Result<u16> {
        let address = self.config.device_address;
        let low = self.read_control_raw(control_read(MAIN_TYPE_LO, address))?;
        let high = self.read_control_raw(control_read(MAIN_TYPE_HI, address))?;
        let group = u16::from_le_bytes([low, high]);
        if group != SENSOR_GROUP_ID {
            crate::log_error!(
                "unexpected group id: expected {:#x}, got {:#x}",
                SENSOR_GROUP_ID,
                group
            );
            return Err(Error::with_detail(
                ErrorKind::DeviceNotFound,
                "unexpected group id",
                i32::from(group),
            ));
        }
        Ok(group)
    }

    /// Seat the pointer at 0x07 and read the three feature bytes in one
    /// auto-increment run. Raw reads: the driver is not initialized yet.
    fn cache_features(&mut self) -> Result<()> {
        let address = self.config.device_address;
        let ptr_control = control_write(MAIN_CUSTOM_PTR, address);
        self.write_command_raw(ptr_control, 0x00, CUSTOM_OPERATING_FUNCTIONS)?;

        let read_control = control_read(MAIN_CUSTOM_PTR, address);
        self.operating_functions =
            OperatingFunctions::from_bits_retain(self.read_control_raw(read_control)?);
        self.operating_mode_support =
            OperatingModeSupport::from_bits_retain(self.read_control_raw(read_control)?);
        self.special_features =
            SpecialFeatures::from_bits_retain(self.read_control_raw(read_control)?);
        Ok(())
    }

    fn sleep_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.bus.delay_us(1000);
        }
    }

    // Feature guards over the begin-time cache

    fn has_serial_number(&self) -> bool {
        self.operating_functions
            .contains(OperatingFunctions::SERIAL_NUMBER)
    }

    fn has_part_name(&self) -> bool {
        self.operating_functions
            .contains(OperatingFunctions::PART_NAME)
    }

    fn has_address_config(&self) -> bool {
        self.operating_functions
            .contains(OperatingFunctions::ADDRESS_CONFIG)
    }

    fn has_global_interval(&self) -> bool {
        self.operating_functions
            .contains(OperatingFunctions::GLOBAL_INTERVAL)
    }

    fn has_specific_interval(&self) -> bool {
        self.operating_functions
            .contains(OperatingFunctions::SPECIFIC_INTERVAL)
    }

    fn has_filter_config(&self) -> bool {
        self.operating_functions
            .contains(OperatingFunctions::FILTER_CONFIG)
    }

    fn has_error_code(&self) -> bool {
        self.operating_functions
            .contains(OperatingFunctions::ERROR_CODE)
    }

    fn has_low_power_mode(&self) -> bool {
        self.operating_mode_support
            .contains(OperatingModeSupport::LOW_POWER)
    }

    fn has_e2_priority(&self) -> bool {
        self.operating_mode_support
            .contains(OperatingModeSupport::E2_PRIORITY)
    }

    fn has_auto_adjust(&self) -> bool {
        self.special_features
            .contains(SpecialFeatures::AUTO_ADJUST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockBus;

    fn ready_driver() -> Ee871Driver<MockBus> {
        let mut bus = MockBus::new();
        bus.set_feature_bytes(0xFF, 0x03, 0x01);
        let mut driver = Ee871Driver::new(bus);
        driver.begin(Config::default()).unwrap();
        driver
    }

    #[test]
    fn operations_require_begin() {
        let mut driver = Ee871Driver::new(MockBus::new());
        assert_eq!(
            driver.probe().unwrap_err().kind,
            ErrorKind::NotInitialized
        );
        assert_eq!(
            driver.read_status().unwrap_err().kind,
            ErrorKind::NotInitialized
        );
        assert_eq!(
            driver.custom_write(0x40, 1).unwrap_err().kind,
            ErrorKind::NotInitialized
        );
        assert_eq!(
            driver.bus_reset().unwrap_err().kind,
            ErrorKind::NotInitialized
        );
        assert_eq!(driver.state(), DriverState::Uninit);
    }

    #[test]
    fn begin_twice_is_rejected() {
        let mut driver = ready_driver();
        let err = driver.begin(Config::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyInitialized);
    }

    #[test]
    fn begin_reports_unexpected_identity() {
        let mut bus = MockBus::new();
        bus.device.group = 0x1234;
        let mut driver = Ee871Driver::new(bus);
        let err = driver.begin(Config::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeviceNotFound);
        assert_eq!(err.detail, 0x1234);
        assert_eq!(driver.state(), DriverState::Uninit);
    }

    #[test]
    fn custom_pointer_range_boundary() {
        let mut driver = ready_driver();
        assert!(driver.set_custom_pointer(0xFF).is_ok());
        let err = driver.set_custom_pointer(0x100).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
        assert_eq!(err.detail, 0x100);
    }

    #[test]
    fn custom_block_read_respects_memory_map() {
        let mut driver = ready_driver();
        let mut buf = [0u8; 2];
        let err = driver.custom_read_block(0xFF, &mut buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
        let err = driver.custom_read_block(0x00, &mut []).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParam);
    }

    #[test]
    fn invalid_main_command_rejected() {
        let mut driver = ready_driver();
        let err = driver.read_control_byte(0x10).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParam);
    }

    #[test]
    fn interval_range_is_validated_before_bus_io() {
        let mut driver = ready_driver();
        let quiet_before = driver.bus.event_count();
        for interval in [149u16, 36001] {
            let err = driver.write_measurement_interval(interval).unwrap_err();
            assert_eq!(err.kind, ErrorKind::OutOfRange);
            assert_eq!(err.detail, i32::from(interval));
        }
        assert_eq!(driver.bus.event_count(), quiet_before);
    }

    #[test]
    fn end_returns_to_uninit_and_keeps_counters() {
        let mut driver = ready_driver();
        driver.read_status().unwrap();
        let successes = driver.total_success();
        driver.end();
        assert_eq!(driver.state(), DriverState::Uninit);
        assert_eq!(driver.total_success(), successes);
        assert_eq!(
            driver.read_status().unwrap_err().kind,
            ErrorKind::NotInitialized
        );
    }
}
