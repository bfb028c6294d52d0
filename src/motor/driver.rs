// Motion controller for the roller
//
// Owns the device and the operator-facing motion state: which mode the
// policy is in, the last seek target, the approach speed and the direction
// for continuous running.

use tracing::{debug, info, warn};

use super::motion::{normalize_position, plan_seek, SeekPlan, SEEK_DEGREES};
use super::roller::{Mode, RegisterBus, Result, Roller, RollerError};
use crate::config::DEFAULT_APPROACH_SPEED;
use crate::messages::{Direction, MotionCommand, StatusReport};

/// Motion state; mirrors what was commanded, never caches readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorState {
    pub mode: Mode,
    pub motor_enabled: bool,
    /// Last absolute seek target, 0.01 degree, multi-turn
    pub target_position: i32,
    /// 0.01 rpm; only the magnitude is used
    pub approach_speed: i32,
    pub direction: Direction,
}

impl Default for ActuatorState {
    fn default() -> Self {
        Self {
            mode: Mode::Speed,
            motor_enabled: false,
            target_position: 0,
            approach_speed: DEFAULT_APPROACH_SPEED,
            direction: Direction::Positive,
        }
    }
}

/// High-level controller for a single roller
pub struct MotionController<B: RegisterBus> {
    roller: Roller<B>,
    state: ActuatorState,
}

impl<B: RegisterBus> MotionController<B> {
    pub fn new(bus: B) -> Self {
        Self::with_approach_speed(bus, DEFAULT_APPROACH_SPEED)
    }

    pub fn with_approach_speed(bus: B, approach_speed: i32) -> Self {
        Self {
            roller: Roller::new(bus),
            state: ActuatorState {
                approach_speed: approach_speed.saturating_abs(),
                ..ActuatorState::default()
            },
        }
    }

    pub fn state(&self) -> &ActuatorState {
        &self.state
    }

    pub fn bus(&self) -> &B {
        self.roller.bus()
    }

    pub fn bus_mut(&mut self) -> &mut B {
        self.roller.bus_mut()
    }

    /// Probe the device and leave it disabled in speed mode.
    ///
    /// Returns the firmware version. On failure nothing has been written.
    pub fn begin(&mut self) -> Result<u8> {
        let version = self.roller.begin()?;
        self.state.motor_enabled = false;
        self.state.mode = Mode::Speed;
        info!("Roller responding, firmware version {}", version);
        Ok(version)
    }

    /// Select speed mode and enable the output
    pub fn arm(&mut self) -> Result<()> {
        self.set_mode(Mode::Speed)?;
        self.set_motor_output(true)
    }

    /// Stop and disable the output
    pub fn disarm(&mut self) -> Result<()> {
        info!("Disarming roller");
        self.roller.set_speed(0)?;
        self.set_motor_output(false)
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.roller.set_mode(mode)?;
        if self.state.mode != mode {
            info!("Mode {:?} -> {:?}", self.state.mode, mode);
        }
        self.state.mode = mode;
        Ok(())
    }

    /// Raw mode byte; values outside 1..=4 fail without touching the bus
    pub fn set_mode_raw(&mut self, raw: u8) -> Result<Mode> {
        let mode = self.roller.set_mode_raw(raw)?;
        self.state.mode = mode;
        Ok(mode)
    }

    pub fn set_motor_output(&mut self, enabled: bool) -> Result<()> {
        self.roller.set_motor_output(enabled)?;
        self.state.motor_enabled = enabled;
        Ok(())
    }

    pub fn set_speed(&mut self, speed: i32) -> Result<()> {
        self.roller.set_speed(speed)
    }

    pub fn set_position(&mut self, position: i32) -> Result<()> {
        self.roller.set_position(position)
    }

    pub fn set_current(&mut self, current: i32) -> Result<()> {
        self.roller.set_current(current)
    }

    pub fn get_speed(&mut self) -> Result<i32> {
        self.roller.get_speed()
    }

    pub fn get_position(&mut self) -> Result<i32> {
        self.roller.get_position()
    }

    pub fn get_current(&mut self) -> Result<i32> {
        self.roller.get_current()
    }

    pub fn get_status(&mut self) -> Result<u8> {
        self.roller.get_status()
    }

    pub fn set_led_color(&mut self, r: u8, g: u8, b: u8) -> Result<()> {
        self.roller.set_led_color(r, g, b)
    }

    /// Take a new approach speed and apply it in the current mode.
    ///
    /// In position mode the magnitude becomes the seek speed. Otherwise speed
    /// mode is selected and the magnitude is sent with the tracked direction.
    pub fn set_motor_speed(&mut self, speed: i32) -> Result<()> {
        self.state.approach_speed = speed.saturating_abs();

        if self.state.mode == Mode::Position {
            self.roller.set_speed(self.state.approach_speed)
        } else {
            self.set_mode(Mode::Speed)?;
            let signed = self.state.direction.apply(self.state.approach_speed);
            self.roller.set_speed(signed)
        }
    }

    /// Seek to `target_degrees` within the revolution, taking the short way.
    ///
    /// Angles outside 0..=360 and a failed position read abort before
    /// anything is written.
    pub fn move_to_normalized_position(&mut self, target_degrees: i32) -> Result<SeekPlan> {
        if !SEEK_DEGREES.contains(&target_degrees) {
            return Err(RollerError::InvalidAngle(target_degrees));
        }

        let raw = self.roller.get_position()?;
        let plan = plan_seek(raw, target_degrees).ok_or(RollerError::SeekOutOfRange {
            position: raw,
            degrees: target_degrees,
        })?;
        debug!(
            "Seek {} deg: at {} deg, path {:+} deg, target {}",
            target_degrees, plan.current_degrees, plan.distance, plan.target
        );

        self.seek_absolute(plan.target)?;
        Ok(plan)
    }

    /// Seek to a raw absolute position at the approach speed
    pub fn seek_absolute(&mut self, target: i32) -> Result<()> {
        self.state.target_position = target;
        self.set_mode(Mode::Position)?;
        self.roller.set_speed(self.state.approach_speed)?;
        self.roller.set_position(target)
    }

    /// Spin continuously at the approach speed in `direction`
    pub fn run_continuous(&mut self, direction: Direction) -> Result<()> {
        self.state.direction = direction;
        self.set_mode(Mode::Speed)?;
        self.roller.set_speed(direction.apply(self.state.approach_speed))
    }

    /// Zero the speed command and leave position seeking
    pub fn stop(&mut self) -> Result<()> {
        self.roller.set_speed(0)?;
        self.state.mode = Mode::Speed;
        Ok(())
    }

    /// Read speed and position for display
    pub fn status(&mut self) -> Result<StatusReport> {
        let speed = self.roller.get_speed()?;
        let position = self.roller.get_position()?;

        Ok(StatusReport {
            speed,
            position,
            degrees: normalize_position(position),
        })
    }

    /// Execute one operator command
    pub fn apply(&mut self, cmd: MotionCommand) -> Result<()> {
        match cmd {
            MotionCommand::SeekTo(degrees) => self.move_to_normalized_position(degrees).map(|_| ()),
            MotionCommand::SetSpeed(speed) => self.set_motor_speed(speed),
            MotionCommand::RunContinuous(direction) => self.run_continuous(direction),
            MotionCommand::Stop => self.stop(),
            MotionCommand::SetPosition(position) => self.seek_absolute(position),
            MotionCommand::SetMode(mode) => self.set_mode(mode),
            MotionCommand::SetCurrent(current) => self.set_current(current),
            MotionCommand::SetLed { r, g, b } => self.set_led_color(r, g, b),
        }
    }
}

impl<B: RegisterBus> Drop for MotionController<B> {
    fn drop(&mut self) {
        // Don't leave the shaft spinning
        if self.state.motor_enabled {
            if let Err(e) = self.roller.set_speed(0) {
                warn!("Failed to stop roller on drop: {}", e);
            }
        }
    }
}
