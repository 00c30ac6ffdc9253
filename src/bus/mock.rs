//! Mock E2 bus with a simulated EE871 slave
//!
//! [`MockBus`] implements [`E2Bus`] over two virtual open-drain lines and
//! runs an edge-driven slave state machine behind them, so the real
//! bit-banged master can be exercised on the host wire-cycle by
//! wire-cycle: START/STOP detection, MSB-first shifting, slave ACKs, slave
//! transmit with PEC, custom-pointer auto-increment, and write commit.
//!
//! [`MockDevice`] models the device itself (identity, measurement values,
//! 256-byte custom memory) plus fault knobs for tests: address mismatch,
//! forced NACKs, PEC corruption, dropped writes. Electrical faults (lines
//! held low) live on the bus.

use heapless::Vec;

use crate::device::commands::{
    CUSTOM_MEMORY_SIZE, MAIN_CUSTOM_PTR, MAIN_CUSTOM_WRITE, SENSOR_GROUP_ID, SENSOR_SUBGROUP_ID,
};

use super::frame::pec_read;
use super::E2Bus;

/// Capacity of the wire-event log
const EVENT_CAPACITY: usize = 128;

/// Wire-visible protocol event, recorded for test assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEvent {
    /// START condition observed
    Start,
    /// STOP condition observed
    Stop,
    /// Byte shifted in from the master, with the slave's ACK decision
    MasterByte { value: u8, acked: bool },
    /// Byte shifted out by the slave, with the master's ACK decision
    SlaveByte { value: u8, acked: bool },
}

/// Simulated EE871 behind the mock bus
#[derive(Debug, Clone)]
pub struct MockDevice {
    /// E2 address the device answers on
    pub address: u8,
    /// Sensor group identity (type low/high reads)
    pub group: u16,
    /// Sensor subgroup identity
    pub subgroup: u8,
    /// Available-measurements bitfield
    pub available: u8,
    /// Status byte
    pub status: u8,
    /// Measurement values MV1..MV4
    pub mv1: u16,
    pub mv2: u16,
    pub mv3: u16,
    pub mv4: u16,
    /// Custom memory, 8-bit addressed
    pub memory: [u8; CUSTOM_MEMORY_SIZE],
    /// Custom-memory pointer, auto-incremented after each pointer read
    pub pointer: u8,

    // Fault injection
    /// Refuse every control byte
    pub nack_control: bool,
    /// Refuse control bytes of write transactions only
    pub nack_write_control: bool,
    /// Refuse the address byte of write transactions
    pub nack_address: bool,
    /// Refuse the data byte of write transactions
    pub nack_data: bool,
    /// Refuse the PEC byte of write transactions
    pub nack_pec: bool,
    /// Answer reads with an off-by-one PEC
    pub corrupt_pec: bool,
    /// Acknowledge writes but never commit them
    pub drop_writes: bool,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            address: 0,
            group: SENSOR_GROUP_ID,
            subgroup: SENSOR_SUBGROUP_ID,
            available: 0x08,
            status: 0,
            mv1: 0,
            mv2: 0,
            mv3: 0,
            mv4: 0,
            memory: [0; CUSTOM_MEMORY_SIZE],
            pointer: 0,
            nack_control: false,
            nack_write_control: false,
            nack_address: false,
            nack_data: false,
            nack_pec: false,
            corrupt_pec: false,
            drop_writes: false,
        }
    }
}

impl MockDevice {
    /// Data byte the device answers for a read with the given main nibble
    fn respond(&mut self, main: u8) -> u8 {
        match main {
            0x1 => (self.group & 0xFF) as u8,
            0x2 => self.subgroup,
            0x3 => self.available,
            0x4 => (self.group >> 8) as u8,
            0x5 => {
                let value = self.memory[usize::from(self.pointer)];
                self.pointer = self.pointer.wrapping_add(1);
                value
            }
            0x7 => self.status,
            0x8 => (self.mv1 & 0xFF) as u8,
            0x9 => (self.mv1 >> 8) as u8,
            0xA => (self.mv2 & 0xFF) as u8,
            0xB => (self.mv2 >> 8) as u8,
            0xC => (self.mv3 & 0xFF) as u8,
            0xD => (self.mv3 >> 8) as u8,
            0xE => (self.mv4 & 0xFF) as u8,
            0xF => (self.mv4 >> 8) as u8,
            _ => 0,
        }
    }
}

/// Slave protocol phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Between STOP and START
    Idle,
    /// Shifting a byte in from the master
    Receive,
    /// Driving the ACK slot for a received byte
    SlaveAck,
    /// Shifting a byte out to the master
    Transmit,
    /// Master drives the ACK slot for a transmitted byte
    MasterAck,
    /// Transaction over (NACK seen); waiting for STOP
    Halted,
}

/// Mock E2 bus: two open-drain lines plus the slave engine
pub struct MockBus {
    // Open-drain line contributions; the observable level is the AND
    scl_master: bool,
    sda_master: bool,
    scl_slave: bool,
    sda_slave: bool,

    /// Electrical fault: clock line shorted low
    pub hold_scl_low: bool,
    /// Electrical fault: data line shorted low
    pub hold_sda_low: bool,

    phase: Phase,
    shift_in: u8,
    bits_in: u8,
    byte_index: u8,
    control: u8,
    address_byte: u8,
    data_byte: u8,
    tx_queue: [u8; 2],
    tx_queue_len: u8,
    tx_queue_pos: u8,
    tx_byte: u8,
    tx_bits: u8,
    master_ack: bool,
    last_ack_was_nack: bool,

    /// The simulated device
    pub device: MockDevice,
    /// Recorded protocol events
    pub events: Vec<WireEvent, EVENT_CAPACITY>,
    /// Total delay time requested by the master
    pub elapsed_us: u64,
}

impl MockBus {
    /// Mock bus with a healthy device at address 0
    pub fn new() -> Self {
        Self {
            scl_master: true,
            sda_master: true,
            scl_slave: true,
            sda_slave: true,
            hold_scl_low: false,
            hold_sda_low: false,
            phase: Phase::Idle,
            shift_in: 0,
            bits_in: 0,
            byte_index: 0,
            control: 0,
            address_byte: 0,
            data_byte: 0,
            tx_queue: [0; 2],
            tx_queue_len: 0,
            tx_queue_pos: 0,
            tx_byte: 0,
            tx_bits: 0,
            master_ack: false,
            last_ack_was_nack: false,
            device: MockDevice::default(),
            events: Vec::new(),
            elapsed_us: 0,
        }
    }

    /// Seed the feature registers (custom 0x07/0x08/0x09)
    pub fn set_feature_bytes(&mut self, functions: u8, mode_support: u8, special: u8) {
        self.device.memory[0x07] = functions;
        self.device.memory[0x08] = mode_support;
        self.device.memory[0x09] = special;
    }

    /// Number of recorded protocol events
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn scl_level(&self) -> bool {
        self.scl_master && self.scl_slave && !self.hold_scl_low
    }

    fn sda_level(&self) -> bool {
        self.sda_master && self.sda_slave && !self.hold_sda_low
    }

    fn record(&mut self, event: WireEvent) {
        self.events.push(event).ok();
    }

    fn on_start(&mut self) {
        self.phase = Phase::Receive;
        self.shift_in = 0;
        self.bits_in = 0;
        self.byte_index = 0;
        self.tx_queue_len = 0;
        self.tx_queue_pos = 0;
        self.sda_slave = true;
        self.record(WireEvent::Start);
    }

    fn on_stop(&mut self) {
        self.phase = Phase::Idle;
        self.sda_slave = true;
        self.record(WireEvent::Stop);
    }

    fn on_scl_rise(&mut self) {
        match self.phase {
            Phase::Receive => {
                self.shift_in = (self.shift_in << 1) | u8::from(self.sda_level());
                self.bits_in += 1;
            }
            Phase::MasterAck => {
                self.master_ack = !self.sda_level();
            }
            _ => {}
        }
    }

    fn on_scl_fall(&mut self) {
        match self.phase {
            Phase::Receive if self.bits_in == 8 => {
                self.bits_in = 0;
                let byte = self.shift_in;
                self.shift_in = 0;
                let acked = self.accept_byte(byte);
                // ACK = drive low through the next clock
                self.sda_slave = !acked;
                self.last_ack_was_nack = !acked;
                self.phase = Phase::SlaveAck;
            }
            Phase::SlaveAck => {
                self.sda_slave = true;
                if self.last_ack_was_nack {
                    self.phase = Phase::Halted;
                } else if self.byte_index == 1 && self.control & 0x01 != 0 {
                    // Control byte of a read just ACKed; start driving data
                    self.begin_transmit();
                } else {
                    self.phase = Phase::Receive;
                }
            }
            Phase::Transmit => {
                if self.tx_bits < 8 {
                    self.drive_tx_bit();
                } else {
                    // Eighth bit clock finished; ACK slot belongs to the master
                    self.sda_slave = true;
                    self.phase = Phase::MasterAck;
                }
            }
            Phase::MasterAck => {
                self.record(WireEvent::SlaveByte {
                    value: self.tx_byte,
                    acked: self.master_ack,
                });
                self.tx_queue_pos += 1;
                if self.master_ack && self.tx_queue_pos < self.tx_queue_len {
                    self.begin_transmit();
                } else {
                    self.phase = Phase::Halted;
                }
            }
            _ => {}
        }
    }

    fn begin_transmit(&mut self) {
        self.tx_byte = self.tx_queue[usize::from(self.tx_queue_pos)];
        self.tx_bits = 0;
        self.phase = Phase::Transmit;
        self.drive_tx_bit();
    }

    fn drive_tx_bit(&mut self) {
        let bit = self.tx_byte & (0x80 >> self.tx_bits) != 0;
        self.sda_slave = bit;
        self.tx_bits += 1;
    }

    /// Decide the ACK for a received byte and carry out its effect
    fn accept_byte(&mut self, byte: u8) -> bool {
        let index = self.byte_index;
        self.byte_index += 1;
        let acked = match index {
            0 => {
                self.control = byte;
                let read = byte & 0x01 != 0;
                let addressed = (byte >> 1) & 0x07 == self.device.address;
                let refused = self.device.nack_control
                    || (!read && self.device.nack_write_control)
                    || !addressed;
                if !refused && read {
                    let data = self.device.respond(byte >> 4);
                    let mut pec = pec_read(byte, data);
                    if self.device.corrupt_pec {
                        pec = pec.wrapping_add(1);
                    }
                    self.tx_queue = [data, pec];
                    self.tx_queue_len = 2;
                    self.tx_queue_pos = 0;
                }
                !refused
            }
            1 => {
                self.address_byte = byte;
                !self.device.nack_address
            }
            2 => {
                self.data_byte = byte;
                !self.device.nack_data
            }
            3 => {
                let expected = self
                    .control
                    .wrapping_add(self.address_byte)
                    .wrapping_add(self.data_byte);
                let acked = byte == expected && !self.device.nack_pec;
                if acked {
                    self.commit_write();
                }
                acked
            }
            _ => false,
        };
        self.record(WireEvent::MasterByte { value: byte, acked });
        acked
    }

    fn commit_write(&mut self) {
        match self.control >> 4 {
            MAIN_CUSTOM_PTR => {
                // Address byte carries the (unused) high pointer byte
                self.device.pointer = self.data_byte;
            }
            MAIN_CUSTOM_WRITE => {
                if !self.device.drop_writes {
                    self.device.memory[usize::from(self.address_byte)] = self.data_byte;
                }
            }
            _ => {}
        }
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl E2Bus for MockBus {
    fn set_scl(&mut self, released: bool) {
        let before = self.scl_level();
        self.scl_master = released;
        let after = self.scl_level();
        if !before && after {
            self.on_scl_rise();
        } else if before && !after {
            self.on_scl_fall();
        }
    }

    fn set_sda(&mut self, released: bool) {
        let before = self.sda_level();
        self.sda_master = released;
        let after = self.sda_level();
        if self.scl_level() {
            if before && !after {
                self.on_start();
            } else if !before && after {
                self.on_stop();
            }
        }
    }

    fn read_scl(&mut self) -> bool {
        self.scl_level()
    }

    fn read_sda(&mut self) -> bool {
        self.sda_level()
    }

    fn delay_us(&mut self, us: u32) {
        self.elapsed_us += u64::from(us);
    }
}
