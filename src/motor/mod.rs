// Motor control module for a single RollerCAN actuator
//
// Provides:
// - RollerCAN I2C register protocol (transport + typed register map)
// - Shortest-path angular seek policy
// - Motion controller owning the actuator state
// - In-memory simulated roller

mod driver;
pub mod motion;
pub mod roller;
pub mod sim;

pub use driver::{ActuatorState, MotionController};
pub use motion::{normalize_position, plan_seek, shortest_path_distance, SeekPlan};
pub use roller::{I2cBus, Mode, Register, RegisterBus, Roller, RollerError};
pub use sim::SimulatedRoller;
