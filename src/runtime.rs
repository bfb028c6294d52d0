// 10 Hz control loop with device health tracking
//
// One tick: drain every input source into a queue, dispatch at most one
// request, then poll speed/position for display. A roller that fails its
// liveness probe puts the runtime in `DeviceAbsent`; commands are refused and
// the probe is retried until the device answers.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::command::parse_line;
use crate::config::{probe_retry_ticks, Settings, LOOP_HZ};
use crate::keypad::{KeyAction, Keypad};
use crate::link::SerialLink;
use crate::messages::{HealthReport, MotionCommand, Query, Request, RuntimeHealth, StatusReport};
use crate::motor::{MotionController, RegisterBus, RollerError, SimulatedRoller};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One item of operator input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Request(Request),
    Quit,
}

/// Anything the loop drains once per tick
pub trait InputSource {
    /// Collect waiting input without blocking
    fn poll(&mut self) -> Result<Vec<Input>, BoxError>;

    /// Deliver the reply to a request this source made. Dropped by default.
    fn reply(&mut self, _line: &str) -> Result<(), BoxError> {
        Ok(())
    }
}

impl InputSource for SerialLink {
    fn poll(&mut self) -> Result<Vec<Input>, BoxError> {
        let mut inputs = Vec::new();
        for line in self.read_lines()? {
            match parse_line(&line) {
                Some(request) => inputs.push(Input::Request(request)),
                None => debug!("Discarded line: {:?}", line),
            }
        }
        Ok(inputs)
    }

    fn reply(&mut self, line: &str) -> Result<(), BoxError> {
        Ok(self.send(line)?)
    }
}

impl InputSource for Keypad {
    fn poll(&mut self) -> Result<Vec<Input>, BoxError> {
        let inputs = self
            .read_actions()?
            .into_iter()
            .map(|action| match action {
                KeyAction::Command(cmd) => Input::Request(cmd.into()),
                KeyAction::Quit => Input::Quit,
            })
            .collect();
        Ok(inputs)
    }
}

pub struct Runtime<B: RegisterBus> {
    controller: MotionController<B>,
    health: RuntimeHealth,
    ticks_since_probe: u32,
    last_display: Option<(i32, i32)>,
}

impl<B: RegisterBus> Runtime<B> {
    pub fn new(controller: MotionController<B>) -> Self {
        Self {
            controller,
            health: RuntimeHealth::DeviceAbsent, // Absent until the first probe answers
            ticks_since_probe: 0,
            last_display: None,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn controller(&self) -> &MotionController<B> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut MotionController<B> {
        &mut self.controller
    }

    /// Probe the roller and arm it if it answers
    pub fn start(&mut self) -> RuntimeHealth {
        self.ticks_since_probe = 0;
        let armed = self
            .controller
            .begin()
            .and_then(|_| self.controller.arm());

        match armed {
            Ok(()) => {
                info!("Roller armed in speed mode");
                self.set_health(RuntimeHealth::Ok);
            }
            Err(e) => {
                warn!("Roller init failed: {}", e);
                self.set_health(RuntimeHealth::DeviceAbsent);
            }
        }
        self.health
    }

    fn set_health(&mut self, health: RuntimeHealth) {
        if self.health != health {
            info!("Health {:?} -> {:?}", self.health, health);
            self.health = health;
        }
    }

    /// Execute one request; returns the reply line, if any
    pub fn handle_request(&mut self, request: Request) -> Option<String> {
        if self.health == RuntimeHealth::DeviceAbsent {
            if request == Request::Query(Query::Status) {
                return Some(self.health_json(None, None));
            }
            warn!("Device absent, refusing {:?}", request);
            return Some("ERR device absent".to_string());
        }

        match request {
            Request::Motion(cmd) => self.on_command(cmd),
            Request::Query(query) => self.on_query(query),
        }
    }

    fn on_command(&mut self, cmd: MotionCommand) -> Option<String> {
        info!("Command: {:?}", cmd);
        match self.controller.apply(cmd) {
            Ok(()) => match cmd {
                MotionCommand::SetSpeed(speed) => {
                    Some(format!("Speed set to {:.2} rpm", speed as f32 / 100.0))
                }
                _ => None,
            },
            Err(e) => {
                warn!("Command {:?} failed: {}", cmd, e);
                Some(format!("ERR {}", e))
            }
        }
    }

    fn on_query(&mut self, query: Query) -> Option<String> {
        let reply = match query {
            Query::Speed => self.controller.get_speed().map(|v| v.to_string()),
            Query::Position => self.controller.get_position().map(|v| v.to_string()),
            Query::Status => {
                let readings = self.controller.status().ok();
                // The status register is only read on request
                let status = match self.controller.get_status() {
                    Ok(status) => Some(status),
                    Err(e) => {
                        warn!("Status register read failed: {}", e);
                        None
                    }
                };
                return Some(self.health_json(readings, status));
            }
        };

        Some(reply.unwrap_or_else(|e: RollerError| {
            warn!("Query {:?} failed: {}", query, e);
            format!("ERR {}", e)
        }))
    }

    fn health_json(&self, readings: Option<StatusReport>, status: Option<u8>) -> String {
        let report = HealthReport {
            health: self.health,
            readings,
            status,
        };
        serde_json::to_string(&report).unwrap_or_else(|e| format!("ERR {}", e))
    }

    /// Periodic work: re-probe while absent, otherwise poll live readings
    pub fn tick(&mut self) -> Option<StatusReport> {
        if self.health == RuntimeHealth::DeviceAbsent {
            self.ticks_since_probe += 1;
            if self.ticks_since_probe >= probe_retry_ticks() {
                debug!("Re-probing roller");
                self.start();
            }
            return None;
        }

        match self.controller.status() {
            Ok(report) => {
                self.set_health(RuntimeHealth::Ok);
                Some(report)
            }
            Err(e) => {
                if self.health == RuntimeHealth::Ok {
                    warn!("Status poll failed: {}", e);
                }
                self.set_health(RuntimeHealth::BusError);
                None
            }
        }
    }

    /// Show the readings if they changed since last time
    fn refresh_display(&mut self, report: &StatusReport) {
        let shown = (report.speed, report.degrees);
        if self.last_display != Some(shown) {
            info!("Speed: {:.2} rpm  Pos: {} deg", report.rpm(), report.degrees);
            self.last_display = Some(shown);
        }
    }

    /// Stop and disable the output before exiting
    pub fn shutdown(&mut self) {
        if self.health == RuntimeHealth::DeviceAbsent {
            return;
        }
        if let Err(e) = self.controller.disarm() {
            warn!("Failed to disarm roller: {}", e);
        }
    }

    /// Run the control loop until a source quits, a source fails or
    /// `interrupt` resolves. The roller is disarmed on every exit path.
    pub async fn serve(
        &mut self,
        sources: &mut [Box<dyn InputSource>],
        interrupt: impl std::future::Future<Output = ()>,
    ) -> Result<(), BoxError> {
        let outcome = tokio::select! {
            result = self.control_loop(sources) => result,
            _ = interrupt => {
                info!("Interrupted");
                Ok(())
            }
        };

        if let Err(e) = &outcome {
            warn!("Control loop failed: {}", e);
        }
        self.shutdown();
        outcome
    }

    async fn control_loop(&mut self, sources: &mut [Box<dyn InputSource>]) -> Result<(), BoxError> {
        let mut pending: VecDeque<(usize, Request)> = VecDeque::new();
        let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

        info!("Runtime started: {}Hz loop", LOOP_HZ);

        loop {
            tick.tick().await;

            // 1. Drain input into the queue
            for (index, source) in sources.iter_mut().enumerate() {
                for input in source.poll()? {
                    match input {
                        Input::Request(request) => pending.push_back((index, request)),
                        Input::Quit => {
                            info!("Quit requested");
                            return Ok(());
                        }
                    }
                }
            }

            // 2. At most one request per tick
            if let Some((index, request)) = pending.pop_front() {
                if let Some(reply) = self.handle_request(request) {
                    sources[index].reply(&reply)?;
                }
            }

            // 3. Poll live readings (or re-probe)
            if let Some(report) = self.tick() {
                self.refresh_display(&report);
            }
        }
    }
}

pub async fn run(settings: Settings) -> Result<(), BoxError> {
    if settings.simulate {
        info!("Using simulated roller");
        return run_with(SimulatedRoller::new(), &settings).await;
    }

    let bus = open_bus(&settings.bus)?;
    run_with(bus, &settings).await
}

#[cfg(target_os = "linux")]
fn open_bus(
    path: &str,
) -> Result<crate::motor::I2cBus<linux_embedded_hal::I2cdev>, RollerError> {
    info!("Opening I2C bus {}", path);
    let dev = linux_embedded_hal::I2cdev::new(path).map_err(|e| RollerError::Open {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    Ok(crate::motor::I2cBus::new(dev))
}

#[cfg(not(target_os = "linux"))]
fn open_bus(path: &str) -> Result<SimulatedRoller, RollerError> {
    Err(RollerError::Open {
        path: path.to_string(),
        reason: "I2C buses are only supported on Linux, use --simulate".to_string(),
    })
}

async fn run_with<B: RegisterBus>(bus: B, settings: &Settings) -> Result<(), BoxError> {
    // Open inputs before arming so a bad port never leaves the output on
    let mut sources: Vec<Box<dyn InputSource>> = Vec::new();
    if let Some(port) = &settings.serial {
        sources.push(Box::new(SerialLink::open(port, settings.baud)?));
    }
    if settings.keypad {
        info!("Keys: 1-5 seek, Q/W/E speed, A/S/D anti/stop/cw, X quit");
        sources.push(Box::new(Keypad::enable()?));
    }

    let controller = MotionController::with_approach_speed(bus, settings.approach_speed);
    let mut runtime = Runtime::new(controller);
    runtime.start();

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl-C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let outcome = runtime.serve(&mut sources, interrupt).await;
    info!("Runtime stopped");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_APPROACH_SPEED;
    use crate::messages::Direction;
    use crate::motor::Register;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Replays one batch of input per poll, then fails or goes quiet
    struct Scripted {
        batches: VecDeque<Vec<Input>>,
        fail_when_done: bool,
        replies: Rc<RefCell<Vec<String>>>,
    }

    impl Scripted {
        fn new(batches: Vec<Vec<Input>>, fail_when_done: bool) -> Self {
            Self {
                batches: batches.into(),
                fail_when_done,
                replies: Rc::default(),
            }
        }
    }

    impl InputSource for Scripted {
        fn poll(&mut self) -> Result<Vec<Input>, BoxError> {
            match self.batches.pop_front() {
                Some(batch) => Ok(batch),
                None if self.fail_when_done => {
                    Err(std::io::Error::other("serial port unplugged").into())
                }
                None => Ok(Vec::new()),
            }
        }

        fn reply(&mut self, line: &str) -> Result<(), BoxError> {
            self.replies.borrow_mut().push(line.to_string());
            Ok(())
        }
    }

    fn started() -> Runtime<SimulatedRoller> {
        let mut runtime = Runtime::new(MotionController::new(SimulatedRoller::new()));
        assert_eq!(runtime.start(), RuntimeHealth::Ok);
        runtime
    }

    #[test]
    fn test_start_arms_motor() {
        let runtime = started();
        assert!(runtime.controller().state().motor_enabled);
        assert_eq!(runtime.controller().bus().register_u8(Register::Output), 1);
    }

    #[test]
    fn test_absent_device_is_a_state_not_a_halt() {
        let mut runtime = Runtime::new(MotionController::new(SimulatedRoller::absent()));
        assert_eq!(runtime.start(), RuntimeHealth::DeviceAbsent);
        assert!(!runtime.controller().state().motor_enabled);

        let reply = runtime.handle_request(MotionCommand::SeekTo(90).into());
        assert_eq!(reply.as_deref(), Some("ERR device absent"));
        assert!(runtime.controller().bus().writes().is_empty());

        assert_eq!(
            runtime.handle_request(Request::Query(Query::Status)).as_deref(),
            Some(r#"{"health":"device_absent"}"#)
        );
    }

    #[test]
    fn test_reprobe_recovers() {
        let mut runtime = Runtime::new(MotionController::new(SimulatedRoller::absent()));
        runtime.start();
        runtime.controller_mut().bus_mut().set_present(true);

        for _ in 0..probe_retry_ticks() - 1 {
            assert_eq!(runtime.tick(), None);
            assert_eq!(runtime.health(), RuntimeHealth::DeviceAbsent);
        }
        assert_eq!(runtime.tick(), None);
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
        assert!(runtime.controller().state().motor_enabled);
    }

    #[test]
    fn test_set_speed_reply() {
        let mut runtime = started();
        let reply = runtime.handle_request(parse_line("SET_SPEED 1500").unwrap());
        assert_eq!(reply.as_deref(), Some("Speed set to 15.00 rpm"));
        assert_eq!(runtime.controller().state().approach_speed, 1500);
        assert_eq!(runtime.controller_mut().get_speed().unwrap(), 1500);
    }

    #[test]
    fn test_queries() {
        let mut runtime = started();
        runtime
            .controller_mut()
            .bus_mut()
            .set_register_i32(Register::PositionFeedback, 3650);

        assert_eq!(
            runtime.handle_request(Request::Query(Query::Position)).as_deref(),
            Some("3650")
        );
        assert_eq!(
            runtime.handle_request(Request::Query(Query::Speed)).as_deref(),
            Some("0")
        );

        let status = runtime.handle_request(Request::Query(Query::Status)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&status).unwrap();
        assert_eq!(json["health"], "ok");
        assert_eq!(json["degrees"], 36);
        assert_eq!(json["status"], 0);
    }

    #[test]
    fn test_status_register_failure_stays_out_of_tick() {
        let mut runtime = started();
        runtime
            .controller_mut()
            .bus_mut()
            .set_failing_register(Some(Register::Status as u8));

        assert!(runtime.tick().is_some());
        assert_eq!(runtime.health(), RuntimeHealth::Ok);

        let status = runtime.handle_request(Request::Query(Query::Status)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&status).unwrap();
        assert_eq!(json["health"], "ok");
        assert_eq!(json["speed"], 0);
        assert!(json.get("status").is_none(), "got {}", status);
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_failed_command_reports_error() {
        let mut runtime = started();
        runtime.controller_mut().bus_mut().set_fail_writes(true);
        let reply = runtime
            .handle_request(MotionCommand::RunContinuous(Direction::Negative).into())
            .unwrap();
        assert!(reply.starts_with("ERR "), "got {}", reply);
    }

    #[test]
    fn test_tick_tracks_bus_errors() {
        let mut runtime = started();
        runtime.controller_mut().set_speed(2_000).unwrap();

        let report = runtime.tick().unwrap();
        assert_eq!(report.speed, 2_000);
        assert_eq!(runtime.health(), RuntimeHealth::Ok);

        runtime.controller_mut().bus_mut().set_fail_reads(true);
        assert_eq!(runtime.tick(), None);
        assert_eq!(runtime.health(), RuntimeHealth::BusError);

        runtime.controller_mut().bus_mut().set_fail_reads(false);
        assert!(runtime.tick().is_some());
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_keypad_style_session() {
        let mut runtime = started();
        runtime
            .controller_mut()
            .bus_mut()
            .set_register_i32(Register::PositionFeedback, 3650);

        assert_eq!(runtime.handle_request(MotionCommand::SeekTo(10).into()), None);
        assert_eq!(runtime.controller().state().target_position, -35_000);

        runtime.handle_request(MotionCommand::RunContinuous(Direction::Negative).into());
        runtime.handle_request(MotionCommand::Stop.into());
        assert_eq!(runtime.controller_mut().get_speed().unwrap(), 0);
    }

    #[test]
    fn test_shutdown_disarms() {
        let mut runtime = started();
        runtime.handle_request(MotionCommand::SetSpeed(12_000).into());
        runtime.shutdown();

        let bus = runtime.controller().bus();
        assert_eq!(bus.register_u8(Register::Output), 0);
        assert_eq!(bus.register_i32(Register::Speed), 0);
        assert!(!runtime.controller().state().motor_enabled);
    }

    #[tokio::test]
    async fn test_input_failure_still_disarms() {
        let mut runtime = started();
        let script = Scripted::new(
            vec![vec![Input::Request(
                MotionCommand::RunContinuous(Direction::Positive).into(),
            )]],
            true,
        );
        let mut sources: Vec<Box<dyn InputSource>> = vec![Box::new(script)];

        let outcome = runtime.serve(&mut sources, std::future::pending()).await;
        assert!(outcome.is_err());

        let bus = runtime.controller().bus();
        assert_eq!(bus.written_i32(Register::Speed).first(), Some(&DEFAULT_APPROACH_SPEED));
        assert_eq!(bus.register_u8(Register::Output), 0);
        assert_eq!(bus.register_i32(Register::Speed), 0);
        assert!(!runtime.controller().state().motor_enabled);
    }

    #[tokio::test]
    async fn test_serve_until_quit() {
        let mut runtime = started();
        let script = Scripted::new(
            vec![
                vec![
                    Input::Request(parse_line("SET_SPEED 1500").unwrap()),
                    Input::Request(MotionCommand::SeekTo(90).into()),
                ],
                vec![],
                vec![Input::Quit],
            ],
            false,
        );
        let replies = script.replies.clone();
        let mut sources: Vec<Box<dyn InputSource>> = vec![Box::new(script)];

        runtime.serve(&mut sources, std::future::pending()).await.unwrap();

        assert_eq!(replies.borrow().as_slice(), ["Speed set to 15.00 rpm"]);
        assert_eq!(runtime.controller().state().target_position, 9_000);
        assert_eq!(runtime.controller().bus().register_u8(Register::Output), 0);
    }

    #[tokio::test]
    async fn test_interrupt_disarms() {
        let mut runtime = started();
        let mut sources: Vec<Box<dyn InputSource>> = Vec::new();

        runtime.serve(&mut sources, async {}).await.unwrap();
        assert_eq!(runtime.controller().bus().register_u8(Register::Output), 0);
    }
}
