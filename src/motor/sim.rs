// In-memory stand-in for the roller
//
// Holds a 256-byte register file. Command registers are echoed into their
// feedback registers, so a commanded speed or position reads back at once.
// Used by `--simulate` and by the tests.

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use tracing::debug;

use super::roller::{Register, RegisterBus, RollerError, Result};

/// Firmware version reported by the simulated device
pub const SIM_FIRMWARE_VERSION: u8 = 1;

pub struct SimulatedRoller {
    registers: [u8; 256],
    writes: Vec<(u8, Vec<u8>)>,
    present: bool,
    fail_writes: bool,
    fail_reads: bool,
    short_reads: bool,
    failing_register: Option<u8>,
}

impl Default for SimulatedRoller {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRoller {
    pub fn new() -> Self {
        let mut registers = [0u8; 256];
        registers[Register::Version as usize] = SIM_FIRMWARE_VERSION;

        Self {
            registers,
            writes: Vec::new(),
            present: true,
            fail_writes: false,
            fail_reads: false,
            short_reads: false,
            failing_register: None,
        }
    }

    /// A device that never acknowledges its address
    pub fn absent() -> Self {
        Self {
            present: false,
            ..Self::new()
        }
    }

    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Make every read come back empty
    pub fn set_short_reads(&mut self, short: bool) {
        self.short_reads = short;
    }

    /// Fail reads of one register only
    pub fn set_failing_register(&mut self, register: Option<u8>) {
        self.failing_register = register;
    }

    /// Every successful write, in order: (register, payload)
    pub fn writes(&self) -> &[(u8, Vec<u8>)] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Writes to one register, decoded as little-endian i32
    pub fn written_i32(&self, register: Register) -> Vec<i32> {
        self.writes
            .iter()
            .filter(|(reg, _)| *reg == register as u8)
            .filter_map(|(_, payload)| payload.as_slice().try_into().ok())
            .map(i32::from_le_bytes)
            .collect()
    }

    pub fn register_u8(&self, register: Register) -> u8 {
        self.registers[register as usize]
    }

    pub fn register_i32(&self, register: Register) -> i32 {
        let at = register as usize;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.registers[at..at + 4]);
        i32::from_le_bytes(bytes)
    }

    /// Preload a register, e.g. to place the shaft at some position
    pub fn set_register_i32(&mut self, register: Register, value: i32) {
        let at = register as usize;
        self.registers[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn nack() -> ErrorKind {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
    }

    fn echo(&mut self, register: u8) {
        let feedback = match register {
            r if r == Register::Speed as u8 => Register::SpeedFeedback,
            r if r == Register::Position as u8 => Register::PositionFeedback,
            r if r == Register::Current as u8 => Register::CurrentFeedback,
            _ => return,
        };
        let value = i32::from_le_bytes(
            self.registers[register as usize..register as usize + 4]
                .try_into()
                .unwrap_or_default(),
        );
        self.set_register_i32(feedback, value);
    }
}

impl RegisterBus for SimulatedRoller {
    fn write_register(&mut self, register: u8, payload: &[u8]) -> Result<()> {
        if !self.present || self.fail_writes {
            return Err(RollerError::Write {
                register,
                kind: Self::nack(),
            });
        }

        let start = register as usize;
        let end = start + payload.len();
        if end > self.registers.len() {
            return Err(RollerError::PayloadTooLong {
                register,
                len: payload.len(),
            });
        }

        debug!("sim write reg=0x{:02X} payload={:02X?}", register, payload);
        self.registers[start..end].copy_from_slice(payload);
        self.writes.push((register, payload.to_vec()));
        self.echo(register);
        Ok(())
    }

    fn read_register(&mut self, register: u8, buf: &mut [u8]) -> Result<()> {
        if !self.present || self.fail_reads || self.failing_register == Some(register) {
            return Err(RollerError::Read {
                register,
                kind: Self::nack(),
            });
        }

        let start = register as usize;
        let available = self.registers.len() - start;
        let got = if self.short_reads { 0 } else { buf.len().min(available) };
        if got < buf.len() {
            return Err(RollerError::ShortRead {
                register,
                expected: buf.len(),
                got,
            });
        }

        buf.copy_from_slice(&self.registers[start..start + got]);
        Ok(())
    }
}
