// Loop timing, bus and serial defaults, operator presets
use clap::Parser;
use std::time::Duration;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 10;

// While the device is absent, re-run the liveness probe this often
pub const PROBE_RETRY: Duration = Duration::from_secs(2);

// I2C bus device node the roller hangs off
pub const DEFAULT_BUS: &str = "/dev/i2c-1";

// Serial command link
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const SERIAL_TIMEOUT: Duration = Duration::from_millis(10);

// Seek approach speed before the operator picks one (0.01 rpm)
pub const DEFAULT_APPROACH_SPEED: i32 = 1_000;

// Speed presets (0.01 rpm): 120, 200 and 300 rpm
pub const SPEED_PRESETS: [i32; 3] = [12_000, 20_000, 30_000];

// Seek presets (degrees)
pub const SEEK_PRESETS: [i32; 5] = [0, 90, 180, 270, 360];

/// Number of loop ticks between liveness probes while the device is absent
pub fn probe_retry_ticks() -> u32 {
    let tick_ms = 1000 / LOOP_HZ;
    (PROBE_RETRY.as_millis() as u64 / tick_ms).max(1) as u32
}

/// Command line settings
#[derive(Debug, Clone, Parser)]
#[command(name = "roller-runtime", version, about = "Control loop for a RollerCAN actuator")]
pub struct Settings {
    /// I2C bus device node
    #[arg(long, default_value = DEFAULT_BUS)]
    pub bus: String,

    /// Serial port carrying text commands (e.g. SET_SPEED 1500)
    #[arg(long)]
    pub serial: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    pub baud: u32,

    /// Initial seek approach speed in 0.01 rpm
    #[arg(long, default_value_t = DEFAULT_APPROACH_SPEED, allow_hyphen_values = true)]
    pub approach_speed: i32,

    /// Read operator keys from this terminal
    #[arg(long)]
    pub keypad: bool,

    /// Run against an in-memory roller instead of the I2C bus
    #[arg(long)]
    pub simulate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Settings::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::try_parse_from(["roller-runtime"]).unwrap();
        assert_eq!(settings.bus, DEFAULT_BUS);
        assert_eq!(settings.serial, None);
        assert_eq!(settings.baud, DEFAULT_BAUDRATE);
        assert_eq!(settings.approach_speed, DEFAULT_APPROACH_SPEED);
        assert!(!settings.keypad);
        assert!(!settings.simulate);
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::try_parse_from([
            "roller-runtime",
            "--serial",
            "/dev/ttyUSB0",
            "--approach-speed",
            "-2000",
            "--simulate",
        ])
        .unwrap();
        assert_eq!(settings.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(settings.approach_speed, -2000);
        assert!(settings.simulate);
    }

    #[test]
    fn test_probe_retry_ticks() {
        // 2 s at 10 Hz
        assert_eq!(probe_retry_ticks(), 20);
    }
}
