// Text command protocol for the serial link
//
// One command per line, e.g. "SET_SPEED 1500\n". Values are raw device
// units. Lines that don't parse are dropped.

use tracing::debug;

use crate::messages::{MotionCommand, Query, Request};
use crate::motor::motion::SEEK_DEGREES;
use crate::motor::Mode;

/// Longest accepted line, excluding the terminator
pub const MAX_LINE_LEN: usize = 200;

/// Accumulates bytes from the link into complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    line: String,
    overflow: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns a line once its newline arrives
    pub fn push(&mut self, byte: u8) -> Option<String> {
        match byte {
            b'\n' => {
                let line = std::mem::take(&mut self.line);
                if std::mem::take(&mut self.overflow) {
                    debug!("Dropped line longer than {} bytes", MAX_LINE_LEN);
                    return None;
                }
                Some(line)
            }
            b'\r' => None,
            _ if self.overflow => None,
            _ if self.line.len() >= MAX_LINE_LEN => {
                self.line.clear();
                self.overflow = true;
                None
            }
            _ => {
                self.line.push(byte as char);
                None
            }
        }
    }

    /// Feed a chunk; returns every line it completes
    pub fn extend(&mut self, bytes: &[u8]) -> Vec<String> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }
}

/// Parse one line into a request; `None` if it isn't a known command
pub fn parse_line(line: &str) -> Option<Request> {
    let mut words = line.split_whitespace();
    let verb = words.next()?;

    let request = match verb {
        "SET_SPEED" => Request::Motion(MotionCommand::SetSpeed(int_arg(&mut words)?)),
        "SET_POSITION" => Request::Motion(MotionCommand::SetPosition(int_arg(&mut words)?)),
        "SEEK" => {
            let degrees = int_arg(&mut words).filter(|d| SEEK_DEGREES.contains(d));
            let Some(degrees) = degrees else {
                debug!("Ignoring seek outside 0..=360: {:?}", line);
                return None;
            };
            Request::Motion(MotionCommand::SeekTo(degrees))
        }
        "SET_CURRENT" => Request::Motion(MotionCommand::SetCurrent(int_arg(&mut words)?)),
        "SET_MODE" => {
            let mode: Mode = words.next()?.parse().ok()?;
            Request::Motion(MotionCommand::SetMode(mode))
        }
        "SET_LED" => {
            let r = words.next()?.parse().ok()?;
            let g = words.next()?.parse().ok()?;
            let b = words.next()?.parse().ok()?;
            Request::Motion(MotionCommand::SetLed { r, g, b })
        }
        "STOP" => Request::Motion(MotionCommand::Stop),
        "GET_SPEED" => Request::Query(Query::Speed),
        "GET_POSITION" => Request::Query(Query::Position),
        "GET_STATUS" => Request::Query(Query::Status),
        _ => {
            debug!("Ignoring unknown command: {:?}", line);
            return None;
        }
    };

    if words.next().is_some() {
        debug!("Ignoring command with trailing input: {:?}", line);
        return None;
    }
    Some(request)
}

fn int_arg<'a>(words: &mut impl Iterator<Item = &'a str>) -> Option<i32> {
    words.next()?.parse().ok()
}
