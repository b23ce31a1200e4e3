//! Hotkey module for global keyboard event listening
//!
//! Uses macOS CGEventTap to monitor modifier key changes and recognizes
//! the double Command tap that toggles the blackout.

mod gesture;
mod keys;
mod listener;

pub use gesture::{DoubleTapDetector, DEFAULT_DOUBLE_TAP_WINDOW};
#[cfg(test)]
pub use keys::ModifierState;
pub use listener::{HotkeyEvent, HotkeyListener};
