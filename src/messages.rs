// Message types flowing between the input side and the motion controller

use serde::{Deserialize, Serialize};

use crate::motor::Mode;

/// Rotation direction for continuous running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Positive,
    Negative,
}

impl Direction {
    /// Give `magnitude` this direction's sign
    pub fn apply(self, magnitude: i32) -> i32 {
        match self {
            Direction::Positive => magnitude.saturating_abs(),
            Direction::Negative => -magnitude.saturating_abs(),
        }
    }
}

/// A single operator intent, consumed once per control-loop tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionCommand {
    /// Shortest-path seek to a within-revolution angle (degrees)
    SeekTo(i32),
    /// New approach speed (0.01 rpm), applied right away
    SetSpeed(i32),
    RunContinuous(Direction),
    Stop,
    /// Seek to a raw absolute position (0.01 degree)
    SetPosition(i32),
    SetMode(Mode),
    /// Current command (0.01 mA), saturated by the device layer
    SetCurrent(i32),
    SetLed { r: u8, g: u8, b: u8 },
}

/// Read-only requests answered with a reply line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Speed,
    Position,
    Status,
}

/// Anything the serial link or keypad can ask of the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Motion(MotionCommand),
    Query(Query),
}

impl From<MotionCommand> for Request {
    fn from(cmd: MotionCommand) -> Self {
        Request::Motion(cmd)
    }
}

/// Live readings polled each tick for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// 0.01 rpm
    pub speed: i32,
    /// Raw multi-turn position, 0.01 degree
    pub position: i32,
    /// Displayed position, whole degrees in [0, 360)
    pub degrees: i32,
}

impl StatusReport {
    pub fn rpm(&self) -> f32 {
        self.speed as f32 / 100.0
    }
}

/// Health status of the runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    DeviceAbsent,
    BusError,
}

/// Reply body for `GET_STATUS`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub health: RuntimeHealth,
    #[serde(flatten)]
    pub readings: Option<StatusReport>,
    /// Raw status register; left out when it could not be read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u8>,
}
