//! Double Command tap detection
//!
//! Recognizes two clean Command key-down edges that land strictly inside
//! the double-tap window. "Clean" means no Shift, Option or Control is held
//! at the moment Command goes down.

use std::time::{Duration, Instant};

use tracing::debug;

use super::keys::ModifierEvent;

/// Default window between the two Command presses
pub const DEFAULT_DOUBLE_TAP_WINDOW: Duration = Duration::from_millis(400);

/// Emitted once per recognized double tap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleSignal;

/// Edge-triggered double-tap recognizer
#[derive(Debug)]
pub struct DoubleTapDetector {
    window: Duration,
    /// Time of the first press of a potential double tap
    last_command_down: Option<Instant>,
    /// Command state seen on the previous event (for edge detection)
    was_command_down: bool,
}

impl DoubleTapDetector {
    /// Create a detector with the given window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_command_down: None,
            was_command_down: false,
        }
    }

    /// Feed one modifier change; returns a signal when a double tap completes
    pub fn on_modifier_event(&mut self, event: &ModifierEvent) -> Option<ToggleSignal> {
        let just_pressed =
            event.command_down && !self.was_command_down && !event.other_modifiers_down;
        self.was_command_down = event.command_down;

        if !just_pressed {
            return None;
        }

        let now = event.timestamp;
        let within_window = self
            .last_command_down
            .and_then(|first| now.checked_duration_since(first))
            .is_some_and(|elapsed| elapsed < self.window);

        if within_window {
            debug!("double command tap recognized");
            self.last_command_down = None;
            Some(ToggleSignal)
        } else {
            self.last_command_down = Some(now);
            None
        }
    }

    /// Whether a first press is waiting for its partner
    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.last_command_down.is_some()
    }
}

impl Default for DoubleTapDetector {
    fn default() -> Self {
        Self::new(DEFAULT_DOUBLE_TAP_WINDOW)
    }
}
