//! End-to-end driver tests against the mock bus
//!
//! The mock runs a bit-level EE871 slave behind the real master, so these
//! tests exercise the full stack: device operation -> health wrapper ->
//! transaction -> byte/bit layers -> simulated wire.

use ee871::{
    Config, DriverState, Ee871Driver, ErrorKind, Measurements, MockBus, OperatingFunctions,
    OperatingMode, SensorStatus, SpecialFeatures,
};

/// Mock with the full EE871 feature set advertised
fn healthy_bus() -> MockBus {
    let mut bus = MockBus::new();
    bus.set_feature_bytes(0xFF, 0x03, 0x01);
    bus
}

fn ready_driver() -> Ee871Driver<MockBus> {
    let mut driver = Ee871Driver::new(healthy_bus());
    driver.begin(Config::default()).unwrap();
    driver
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn begin_on_healthy_device() {
    let mut driver = Ee871Driver::new(healthy_bus());
    driver.begin(Config::default()).unwrap();

    assert_eq!(driver.state(), DriverState::Ready);
    assert!(driver.is_online());
    assert_eq!(driver.operating_functions().bits(), 0xFF);
    assert_eq!(driver.operating_mode_support().bits(), 0x03);
    assert!(driver
        .special_features()
        .contains(SpecialFeatures::AUTO_ADJUST));
    assert_eq!(driver.consecutive_failures(), 0);
}

#[test]
fn begin_rejects_invalid_config() {
    let mut config = Config::default();
    config.clock_low_us = 99;
    let mut driver = Ee871Driver::new(healthy_bus());
    let err = driver.begin(config).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidConfig);
    assert_eq!(driver.state(), DriverState::Uninit);
    assert!(!driver.is_online());
}

#[test]
fn begin_with_stuck_bus_fails() {
    // SDA held low at entry and never released through the nine-clock
    // rescue
    let mut bus = healthy_bus();
    bus.hold_sda_low = true;
    let mut driver = Ee871Driver::new(bus);
    let err = driver.begin(Config::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::BusStuck);
    assert_eq!(driver.state(), DriverState::Uninit);

    // A clock line that never rises is equally fatal
    let mut bus = healthy_bus();
    bus.hold_scl_low = true;
    let mut driver = Ee871Driver::new(bus);
    let err = driver.begin(Config::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::BusStuck);
}

#[test]
fn feature_cache_failure_is_non_fatal() {
    // Identity reads succeed but the pointer-set write is refused, so the
    // cache stays empty and gated operations report NotSupported.
    let mut bus = healthy_bus();
    bus.device.nack_write_control = true;
    let mut driver = Ee871Driver::new(bus);
    driver.begin(Config::default()).unwrap();

    assert_eq!(driver.state(), DriverState::Ready);
    assert!(driver.operating_functions().is_empty());

    let events_before = driver.bus().event_count();
    let err = driver.write_measurement_interval(200).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotSupported);
    assert_eq!(driver.bus().event_count(), events_before);
}

#[test]
fn end_then_begin_resets_lifetime_counters() {
    let mut driver = ready_driver();
    driver.read_status().unwrap();
    assert!(driver.total_success() > 0);

    driver.end();
    assert_eq!(driver.state(), DriverState::Uninit);
    // Counters stay readable after end
    assert!(driver.total_success() > 0);

    driver.begin(Config::default()).unwrap();
    assert_eq!(driver.total_success(), 0);
    assert_eq!(driver.total_failures(), 0);
}

// ============================================================================
// Measurements
// ============================================================================

#[test]
fn co2_average_reads_low_then_high() {
    let mut driver = ready_driver();
    driver.bus_mut().device.mv4 = 1000;

    let before = driver.total_success();
    let ppm = driver.read_co2_average().unwrap();

    assert_eq!(ppm, 1000);
    assert_eq!(driver.state(), DriverState::Ready);
    // One success per byte read: MV4 low, then MV4 high
    assert_eq!(driver.total_success(), before + 2);
}

#[test]
fn co2_fast_reads_mv3() {
    let mut driver = ready_driver();
    driver.bus_mut().device.mv3 = 0x0420;
    assert_eq!(driver.read_co2_fast().unwrap(), 0x0420);
}

#[test]
fn status_carries_co2_error_latch() {
    let mut driver = ready_driver();
    driver.bus_mut().device.status = 0x08;
    let status = driver.read_status().unwrap();
    assert!(status.contains(SensorStatus::CO2_ERROR));
}

#[test]
fn available_measurements_include_co2() {
    let mut driver = ready_driver();
    let bits = driver.read_available_measurements().unwrap();
    assert!(bits.contains(Measurements::CO2));
}

// ============================================================================
// Health State Machine
// ============================================================================

#[test]
fn consecutive_nacks_drive_the_driver_offline() {
    let mut config = Config::default();
    config.offline_threshold = 3;
    let mut driver = Ee871Driver::new(healthy_bus());
    driver.begin(config).unwrap();

    driver.bus_mut().device.nack_control = true;
    driver.tick(5_000);

    for attempt in 1..=4u8 {
        let err = driver.read_status().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Nack);
        assert_eq!(driver.consecutive_failures(), attempt);
    }

    assert_eq!(driver.total_failures(), 4);
    assert_eq!(driver.state(), DriverState::Offline);
    assert!(!driver.is_online());
    assert_eq!(driver.last_error_ms(), 5_000);
    assert_eq!(driver.last_error().unwrap().kind, ErrorKind::Nack);
}

#[test]
fn success_after_failures_returns_to_ready() {
    let mut driver = ready_driver();
    driver.bus_mut().device.nack_control = true;
    driver.read_status().unwrap_err();
    assert_eq!(driver.state(), DriverState::Degraded);

    driver.bus_mut().device.nack_control = false;
    driver.tick(42);
    driver.read_status().unwrap();

    assert_eq!(driver.state(), DriverState::Ready);
    assert_eq!(driver.consecutive_failures(), 0);
    assert_eq!(driver.last_ok_ms(), 42);
}

#[test]
fn timeout_is_tracked_like_any_failure() {
    let mut driver = ready_driver();
    driver.bus_mut().hold_scl_low = true;
    let err = driver.read_status().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(driver.state(), DriverState::Degraded);
    assert_eq!(driver.total_failures(), 1);
}

#[test]
fn raw_paths_never_touch_counters() {
    let mut driver = ready_driver();
    let successes = driver.total_success();
    let failures = driver.total_failures();

    driver.probe().unwrap();
    driver.bus_reset().unwrap();
    driver.check_bus_idle().unwrap();

    assert_eq!(driver.total_success(), successes);
    assert_eq!(driver.total_failures(), failures);
    assert_eq!(driver.state(), DriverState::Ready);

    // A failing probe is equally invisible to the health machine
    driver.bus_mut().device.nack_control = true;
    driver.probe().unwrap_err();
    assert_eq!(driver.total_failures(), failures);
    assert_eq!(driver.state(), DriverState::Ready);
}

#[test]
fn probe_is_idempotent() {
    let mut driver = ready_driver();
    let first = driver.probe().unwrap();
    let second = driver.probe().unwrap();
    assert_eq!(first, second);
    assert_eq!(first, 0x0367);
}

#[test]
fn recover_runs_rescue_then_tracked_identity_read() {
    let mut driver = ready_driver();
    driver.bus_mut().device.nack_control = true;
    for _ in 0..3 {
        driver.read_status().unwrap_err();
    }
    assert_eq!(driver.state(), DriverState::Degraded);

    driver.bus_mut().device.nack_control = false;
    let group = driver.recover().unwrap();
    assert_eq!(group, 0x0367);
    assert_eq!(driver.state(), DriverState::Ready);
    assert_eq!(driver.consecutive_failures(), 0);
}

#[test]
fn check_bus_idle_reports_held_lines() {
    let mut driver = ready_driver();
    driver.bus_mut().hold_sda_low = true;
    let err = driver.check_bus_idle().unwrap_err();
    assert_eq!(err.kind, ErrorKind::BusStuck);
    assert_eq!(err.detail, 0x02);
}

// ============================================================================
// Custom Memory
// ============================================================================

#[test]
fn custom_write_verifies_read_back() {
    let mut driver = ready_driver();
    driver.custom_write(0x40, 0xA5).unwrap();
    assert_eq!(driver.custom_read(0x40).unwrap(), 0xA5);
}

#[test]
fn custom_write_detects_uncommitted_flash() {
    let mut driver = ready_driver();
    driver.bus_mut().device.drop_writes = true;
    let err = driver.custom_write(0x40, 0xA5).unwrap_err();
    assert_eq!(err.kind, ErrorKind::E2Error);
    // detail carries the value actually observed on verify
    assert_eq!(err.detail, 0x00);
}

#[test]
fn custom_block_read_uses_pointer_auto_increment() {
    let mut driver = ready_driver();
    for i in 0..4u8 {
        driver.bus_mut().device.memory[0x30 + usize::from(i)] = 0x10 + i;
    }
    let mut buf = [0u8; 4];
    driver.custom_read_block(0x30, &mut buf).unwrap();
    assert_eq!(buf, [0x10, 0x11, 0x12, 0x13]);
}

#[test]
fn pec_corruption_is_detected() {
    let mut driver = ready_driver();
    driver.bus_mut().device.corrupt_pec = true;
    let err = driver.read_status().unwrap_err();
    assert_eq!(err.kind, ErrorKind::PecMismatch);
}

// ============================================================================
// Measurement Interval
// ============================================================================

#[test]
fn interval_round_trip() {
    let mut driver = ready_driver();
    driver.write_measurement_interval(200).unwrap();
    assert_eq!(driver.read_measurement_interval().unwrap(), 200);
}

#[test]
fn interval_boundaries() {
    let mut driver = ready_driver();
    assert!(driver.write_measurement_interval(150).is_ok());
    assert!(driver.write_measurement_interval(36000).is_ok());
    assert_eq!(
        driver.write_measurement_interval(149).unwrap_err().kind,
        ErrorKind::OutOfRange
    );
    assert_eq!(
        driver.write_measurement_interval(36001).unwrap_err().kind,
        ErrorKind::OutOfRange
    );
}

#[test]
fn generic_write_to_interval_bytes_is_rerouted() {
    let mut driver = ready_driver();
    // Seed the high byte so the assembled pair is in range (0x00C8 = 200)
    driver.bus_mut().device.memory[0xC7] = 0x00;
    driver.custom_write(0xC6, 200).unwrap();
    assert_eq!(driver.read_measurement_interval().unwrap(), 200);

    // Writing the high byte alone must reroute as well: 0x01C8 = 456
    driver.custom_write(0xC7, 0x01).unwrap();
    assert_eq!(driver.read_measurement_interval().unwrap(), 0x01C8);
}

// ============================================================================
// Identity Strings / Feature Gating
// ============================================================================

#[test]
fn serial_number_block_read() {
    let mut driver = ready_driver();
    for i in 0..16u8 {
        driver.bus_mut().device.memory[0xA0 + usize::from(i)] = b'0' + i;
    }
    let mut serial = [0u8; 16];
    driver.read_serial_number(&mut serial).unwrap();
    assert_eq!(serial[0], b'0');
    assert_eq!(serial[15], b'0' + 15);
}

#[test]
fn part_name_write_and_read_back() {
    let mut driver = ready_driver();
    let name = *b"EE871-PROBE-0001";
    driver.write_part_name(&name).unwrap();

    let mut read_back = [0u8; 16];
    driver.read_part_name(&mut read_back).unwrap();
    assert_eq!(read_back, name);
}

#[test]
fn gated_operations_fail_without_feature_bits() {
    let mut bus = MockBus::new();
    // Device identity is fine but no optional feature is advertised
    bus.set_feature_bytes(0x00, 0x00, 0x00);
    let mut driver = Ee871Driver::new(bus);
    driver.begin(Config::default()).unwrap();

    let events_before = driver.bus().event_count();
    let mut buf = [0u8; 16];
    assert_eq!(
        driver.read_serial_number(&mut buf).unwrap_err().kind,
        ErrorKind::NotSupported
    );
    assert_eq!(
        driver.read_error_code().unwrap_err().kind,
        ErrorKind::NotSupported
    );
    assert_eq!(
        driver.start_auto_adjust().unwrap_err().kind,
        ErrorKind::NotSupported
    );
    assert_eq!(
        driver.write_bus_address(3).unwrap_err().kind,
        ErrorKind::NotSupported
    );
    // Gating uses the begin-time cache; no bus traffic happened
    assert_eq!(driver.bus().event_count(), events_before);
}

#[test]
fn bus_address_write_range() {
    let mut driver = ready_driver();
    driver.write_bus_address(7).unwrap();
    assert_eq!(driver.read_bus_address().unwrap(), 7);
    assert_eq!(
        driver.write_bus_address(8).unwrap_err().kind,
        ErrorKind::OutOfRange
    );
}

#[test]
fn operating_mode_gating_and_range() {
    let mut driver = ready_driver();
    driver
        .write_operating_mode(OperatingMode::LOW_POWER)
        .unwrap();
    assert_eq!(
        driver.read_operating_mode().unwrap(),
        OperatingMode::LOW_POWER
    );

    let err = driver
        .write_operating_mode(OperatingMode::from_bits_retain(0x04))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::OutOfRange);
}

#[test]
fn operating_mode_bits_require_device_support() {
    let mut bus = MockBus::new();
    bus.set_feature_bytes(0xFF, 0x00, 0x01);
    let mut driver = Ee871Driver::new(bus);
    driver.begin(Config::default()).unwrap();

    let err = driver
        .write_operating_mode(OperatingMode::LOW_POWER)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotSupported);
}

#[test]
fn auto_adjust_start_and_status() {
    let mut driver = ready_driver();
    assert!(!driver.read_auto_adjust_status().unwrap());
    driver.start_auto_adjust().unwrap();
    assert!(driver.read_auto_adjust_status().unwrap());
}

#[test]
fn fresh_feature_reads_bypass_the_cache() {
    let mut driver = ready_driver();
    driver.bus_mut().device.memory[0x07] = 0x01;
    let fresh = driver.read_operating_functions().unwrap();
    assert_eq!(fresh, OperatingFunctions::SERIAL_NUMBER);
    // The begin-time cache is unchanged
    assert_eq!(driver.operating_functions().bits(), 0xFF);
}

// ============================================================================
// Calibration
// ============================================================================

#[test]
fn co2_offset_round_trip() {
    let mut driver = ready_driver();
    driver.write_co2_offset(-25).unwrap();
    assert_eq!(driver.read_co2_offset().unwrap(), -25);
    // Little-endian two's complement on the wire
    assert_eq!(driver.bus_mut().device.memory[0x58], 0xE7);
    assert_eq!(driver.bus_mut().device.memory[0x59], 0xFF);
}

#[test]
fn co2_gain_round_trip() {
    let mut driver = ready_driver();
    driver.write_co2_gain(0x8000).unwrap();
    assert_eq!(driver.read_co2_gain().unwrap(), 0x8000);
}

#[test]
fn cal_points_read_lower_then_upper() {
    let mut driver = ready_driver();
    let memory = &mut driver.bus_mut().device.memory;
    memory[0x5C] = 0x90;
    memory[0x5D] = 0x01; // lower = 400
    memory[0x5E] = 0xD0;
    memory[0x5F] = 0x07; // upper = 2000
    assert_eq!(driver.read_co2_cal_points().unwrap(), (400, 2000));
}

#[test]
fn identification_reads() {
    let mut driver = ready_driver();
    let memory = &mut driver.bus_mut().device.memory;
    memory[0x00] = 2;
    memory[0x01] = 5;
    memory[0x02] = 0x10;
    assert_eq!(driver.read_firmware_version().unwrap(), (2, 5));
    assert_eq!(driver.read_e2_spec_version().unwrap(), 0x10);
    assert_eq!(driver.read_group().unwrap(), 0x0367);
    assert_eq!(driver.read_subgroup().unwrap(), 0x09);
}
