// Operator keypad on the local terminal
//
// 1-5 seek to 0/90/180/270/360 deg, Q/W/E pick 120/200/300 rpm,
// A/S/D run anticlockwise / stop / run clockwise, X or Esc quits.

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::warn;

use crate::config::{SEEK_PRESETS, SPEED_PRESETS};
use crate::messages::{Direction, MotionCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Command(MotionCommand),
    Quit,
}

/// Map a key press to an operator action
pub fn key_action(code: KeyCode, modifiers: KeyModifiers) -> Option<KeyAction> {
    let action = match code {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => KeyAction::Quit,
        KeyCode::Esc => KeyAction::Quit,
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            d @ '1'..='5' => {
                let index = d as usize - '1' as usize;
                KeyAction::Command(MotionCommand::SeekTo(SEEK_PRESETS[index]))
            }
            'q' => KeyAction::Command(MotionCommand::SetSpeed(SPEED_PRESETS[0])),
            'w' => KeyAction::Command(MotionCommand::SetSpeed(SPEED_PRESETS[1])),
            'e' => KeyAction::Command(MotionCommand::SetSpeed(SPEED_PRESETS[2])),
            'a' => KeyAction::Command(MotionCommand::RunContinuous(Direction::Negative)),
            's' => KeyAction::Command(MotionCommand::Stop),
            'd' => KeyAction::Command(MotionCommand::RunContinuous(Direction::Positive)),
            'x' => KeyAction::Quit,
            _ => return None,
        },
        _ => return None,
    };
    Some(action)
}

/// Raw-mode terminal reader; restores the terminal on drop
pub struct Keypad;

impl Keypad {
    pub fn enable() -> std::io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }

    /// Collect key actions without blocking
    pub fn read_actions(&self) -> std::io::Result<Vec<KeyAction>> {
        let mut actions = Vec::new();
        while event::poll(Duration::ZERO)? {
            if let Event::Key(KeyEvent {
                code,
                modifiers,
                kind: KeyEventKind::Press,
                ..
            }) = event::read()?
            {
                actions.extend(key_action(code, modifiers));
            }
        }
        Ok(actions)
    }
}

impl Drop for Keypad {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(c: char) -> Option<KeyAction> {
        key_action(KeyCode::Char(c), KeyModifiers::NONE)
    }

    #[test]
    fn test_seek_keys() {
        assert_eq!(press('1'), Some(KeyAction::Command(MotionCommand::SeekTo(0))));
        assert_eq!(press('3'), Some(KeyAction::Command(MotionCommand::SeekTo(180))));
        assert_eq!(press('5'), Some(KeyAction::Command(MotionCommand::SeekTo(360))));
        assert_eq!(press('6'), None);
    }

    #[test]
    fn test_speed_keys() {
        assert_eq!(press('q'), Some(KeyAction::Command(MotionCommand::SetSpeed(12_000))));
        assert_eq!(press('W'), Some(KeyAction::Command(MotionCommand::SetSpeed(20_000))));
        assert_eq!(press('e'), Some(KeyAction::Command(MotionCommand::SetSpeed(30_000))));
    }

    #[test]
    fn test_run_and_stop_keys() {
        assert_eq!(
            press('a'),
            Some(KeyAction::Command(MotionCommand::RunContinuous(Direction::Negative)))
        );
        assert_eq!(press('s'), Some(KeyAction::Command(MotionCommand::Stop)));
        assert_eq!(
            press('d'),
            Some(KeyAction::Command(MotionCommand::RunContinuous(Direction::Positive)))
        );
    }

    #[test]
    fn test_quit_keys() {
        assert_eq!(press('x'), Some(KeyAction::Quit));
        assert_eq!(key_action(KeyCode::Esc, KeyModifiers::NONE), Some(KeyAction::Quit));
        assert_eq!(
            key_action(KeyCode::Char('c'), KeyModifiers::CONTROL),
            Some(KeyAction::Quit)
        );
        assert_eq!(key_action(KeyCode::Enter, KeyModifiers::NONE), None);
    }
}
