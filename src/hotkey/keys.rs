//! Modifier key definitions and state tracking
//!
//! Provides the macOS modifier flag masks, a snapshot of which modifiers
//! are held, and the timestamped event fed to the gesture detector.

use std::time::Instant;

#[cfg(target_os = "macos")]
use core_graphics::event::CGEventFlags;

/// Modifier key flag masks from macOS CGEventFlags
#[cfg(target_os = "macos")]
pub mod flags {
    use core_graphics::event::CGEventFlags;

    /// Command key modifier flag
    pub const COMMAND: CGEventFlags = CGEventFlags::CGEventFlagCommand;
    /// Shift key modifier flag
    pub const SHIFT: CGEventFlags = CGEventFlags::CGEventFlagShift;
    /// Option/Alt key modifier flag
    pub const OPTION: CGEventFlags = CGEventFlags::CGEventFlagAlternate;
    /// Control key modifier flag
    pub const CONTROL: CGEventFlags = CGEventFlags::CGEventFlagControl;
}

/// Tracks which modifier keys are currently pressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    /// Command key is held
    pub command: bool,
    /// Shift key is held
    pub shift: bool,
    /// Option/Alt key is held
    pub option: bool,
    /// Control key is held
    pub control: bool,
}

impl ModifierState {
    /// Create a new ModifierState from CGEventFlags
    #[cfg(target_os = "macos")]
    pub fn from_flags(event_flags: CGEventFlags) -> Self {
        Self {
            command: event_flags.contains(flags::COMMAND),
            shift: event_flags.contains(flags::SHIFT),
            option: event_flags.contains(flags::OPTION),
            control: event_flags.contains(flags::CONTROL),
        }
    }

    /// Any of Shift, Option or Control is held
    pub fn has_other_modifiers(&self) -> bool {
        self.shift || self.option || self.control
    }

    /// Stamp this snapshot with the moment it was observed
    pub fn at(self, timestamp: Instant) -> ModifierEvent {
        ModifierEvent {
            command_down: self.command,
            other_modifiers_down: self.has_other_modifiers(),
            timestamp,
        }
    }
}

/// A single modifier change as seen by the gesture detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifierEvent {
    pub command_down: bool,
    pub other_modifiers_down: bool,
    /// Monotonic time the change was observed
    pub timestamp: Instant,
}
