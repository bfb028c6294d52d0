// RollerCAN register protocol over I2C
//
// Every field lives at a fixed register address on a single device.
// Write: [register, payload...] in one transaction.
// Read:  [register] then a repeated-start read of exactly N bytes.
// Multi-byte values are little-endian.

use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use std::str::FromStr;
use tracing::debug;

/// Fixed bus address of the roller
pub const DEVICE_ADDRESS: u8 = 0x64;

/// Current command limit in 0.01 mA
pub const CURRENT_LIMIT: i32 = 120_000;

/// Largest payload any register takes (the 4-byte signed fields)
const MAX_PAYLOAD: usize = 4;

/// Register addresses
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Output = 0x00,           // 1 byte: 0=disabled, 1=enabled
    Mode = 0x01,             // 1 byte: see `Mode`
    Status = 0x0C,           // 1 byte, bitfield
    Led = 0x30,              // 3 bytes: R, G, B
    Speed = 0x40,            // 4 bytes, signed, 0.01 rpm
    SpeedFeedback = 0x60,    // 4 bytes, read-only
    Position = 0x80,         // 4 bytes, signed, 0.01 degree
    PositionFeedback = 0x90, // 4 bytes, read-only
    Current = 0xB0,          // 4 bytes, signed, 0.01 mA
    CurrentFeedback = 0xC0,  // 4 bytes, read-only
    Version = 0xFE,          // 1 byte, read-only
}

/// Operating modes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Speed = 1,
    Position = 2,
    Current = 3,
    Dial = 4,
}

impl TryFrom<u8> for Mode {
    type Error = RollerError;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            1 => Ok(Mode::Speed),
            2 => Ok(Mode::Position),
            3 => Ok(Mode::Current),
            4 => Ok(Mode::Dial),
            other => Err(RollerError::InvalidMode(other)),
        }
    }
}

impl FromStr for Mode {
    type Err = RollerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SPEED" => Ok(Mode::Speed),
            "POS" | "POSITION" => Ok(Mode::Position),
            "CURRENT" => Ok(Mode::Current),
            "DIAL" => Ok(Mode::Dial),
            _ => s.parse::<u8>().map_err(|_| RollerError::UnknownMode(s.to_string()))?.try_into(),
        }
    }
}

/// Error types for roller communication
#[derive(Debug, thiserror::Error)]
pub enum RollerError {
    #[error("Bus write to register 0x{register:02X} failed: {kind}")]
    Write { register: u8, kind: ErrorKind },

    #[error("Bus read from register 0x{register:02X} failed: {kind}")]
    Read { register: u8, kind: ErrorKind },

    #[error("Short read from register 0x{register:02X}: expected {expected} bytes, got {got}")]
    ShortRead {
        register: u8,
        expected: usize,
        got: usize,
    },

    #[error("Payload of {len} bytes does not fit register 0x{register:02X}")]
    PayloadTooLong { register: u8, len: usize },

    #[error("Invalid mode value {0} (expected 1..=4)")]
    InvalidMode(u8),

    #[error("Unknown mode name: {0}")]
    UnknownMode(String),

    #[error("Seek angle {0} outside 0..=360 degrees")]
    InvalidAngle(i32),

    #[error("Seek to {degrees} deg from position {position} leaves the position range")]
    SeekOutOfRange { position: i32, degrees: i32 },

    #[error("Failed to open bus {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RollerError>;

/// Register-addressed transport to the roller.
///
/// One call is one bus transaction; nothing is retried.
pub trait RegisterBus {
    /// Write `payload` starting at `register`
    fn write_register(&mut self, register: u8, payload: &[u8]) -> Result<()>;

    /// Fill `buf` starting at `register`; fails unless every byte arrives
    fn read_register(&mut self, register: u8, buf: &mut [u8]) -> Result<()>;
}

/// `RegisterBus` over any embedded-hal I2C implementation
pub struct I2cBus<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> I2cBus<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            address: DEVICE_ADDRESS,
        }
    }

    /// Release the underlying I2C peripheral
    pub fn release(self) -> I {
        self.i2c
    }
}

impl<I: I2c> RegisterBus for I2cBus<I> {
    fn write_register(&mut self, register: u8, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(RollerError::PayloadTooLong {
                register,
                len: payload.len(),
            });
        }

        let mut frame = [0u8; MAX_PAYLOAD + 1];
        frame[0] = register;
        frame[1..=payload.len()].copy_from_slice(payload);

        self.i2c
            .write(self.address, &frame[..=payload.len()])
            .map_err(|e| RollerError::Write {
                register,
                kind: e.kind(),
            })
    }

    fn read_register(&mut self, register: u8, buf: &mut [u8]) -> Result<()> {
        self.i2c
            .write_read(self.address, &[register], buf)
            .map_err(|e| RollerError::Read {
                register,
                kind: e.kind(),
            })
    }
}

/// Typed access to the roller's register map
pub struct Roller<B> {
    bus: B,
}

impl<B: RegisterBus> Roller<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Probe the device and put it into safe defaults.
    ///
    /// Reads the firmware version as a liveness check. Only if that succeeds is
    /// the output disabled and speed mode selected. Returns the firmware version.
    pub fn begin(&mut self) -> Result<u8> {
        let version = self.firmware_version()?;
        debug!("Roller firmware version {}", version);

        self.set_motor_output(false)?;
        self.set_mode(Mode::Speed)?;
        Ok(version)
    }

    pub fn firmware_version(&mut self) -> Result<u8> {
        self.read_u8(Register::Version)
    }

    pub fn set_motor_output(&mut self, enable: bool) -> Result<()> {
        self.write_u8(Register::Output, enable as u8)
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.write_u8(Register::Mode, mode as u8)
    }

    /// Validate a raw mode byte, then write it. Nothing is written if invalid.
    pub fn set_mode_raw(&mut self, raw: u8) -> Result<Mode> {
        let mode = Mode::try_from(raw)?;
        self.set_mode(mode)?;
        Ok(mode)
    }

    /// Speed in 0.01 rpm
    pub fn set_speed(&mut self, speed: i32) -> Result<()> {
        self.write_i32(Register::Speed, speed)
    }

    pub fn get_speed(&mut self) -> Result<i32> {
        self.read_i32(Register::SpeedFeedback)
    }

    /// Absolute position in 0.01 degree
    pub fn set_position(&mut self, position: i32) -> Result<()> {
        self.write_i32(Register::Position, position)
    }

    pub fn get_position(&mut self) -> Result<i32> {
        self.read_i32(Register::PositionFeedback)
    }

    /// Current in 0.01 mA, saturated to ±`CURRENT_LIMIT`
    pub fn set_current(&mut self, current: i32) -> Result<()> {
        let clamped = current.clamp(-CURRENT_LIMIT, CURRENT_LIMIT);
        if clamped != current {
            debug!("Current {} clamped to {}", current, clamped);
        }
        self.write_i32(Register::Current, clamped)
    }

    pub fn get_current(&mut self) -> Result<i32> {
        self.read_i32(Register::CurrentFeedback)
    }

    /// Raw status bitfield
    pub fn get_status(&mut self) -> Result<u8> {
        self.read_u8(Register::Status)
    }

    pub fn set_led_color(&mut self, r: u8, g: u8, b: u8) -> Result<()> {
        debug!("Write LED color: ({}, {}, {})", r, g, b);
        self.bus.write_register(Register::Led as u8, &[r, g, b])
    }

    fn write_u8(&mut self, register: Register, value: u8) -> Result<()> {
        debug!("Write u8: reg={:?}, value={}", register, value);
        self.bus.write_register(register as u8, &[value])
    }

    fn write_i32(&mut self, register: Register, value: i32) -> Result<()> {
        debug!("Write i32: reg={:?}, value={}", register, value);
        self.bus.write_register(register as u8, &value.to_le_bytes())
    }

    fn read_u8(&mut self, register: Register) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.bus.read_register(register as u8, &mut buf)?;
        Ok(buf[0])
    }

    fn read_i32(&mut self, register: Register) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.bus.read_register(register as u8, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }
}
