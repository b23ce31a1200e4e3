//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::BlackoutEvent;

/// Status title before the first toggle
pub const TITLE_IDLE: &str = "TB";
/// Status title once the overlay is up
pub const TITLE_BLACKED: &str = "TB off";
/// Status title after a restore
pub const TITLE_RESTORED: &str = "TB on";

/// Requests from clients to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Post a named notification; the toggle notification flips the blackout
    Notify { name: String },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to blackout event notifications
    Subscribe,
}

/// Responses from daemon to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Toggle accepted and queued
    Toggled,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Pushed to subscribed clients
    Event { event: BlackoutEvent },

    /// Error response
    Error { code: String, message: String },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Touch Bar is blacked out (overlay shown or pending)
    pub blacked: bool,

    /// The overlay presentation has run
    pub overlay_presented: bool,

    /// Whether the global hotkey listener is active
    pub hotkey_registered: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,

    /// Short status text, as a menu bar title would show it
    pub title: String,
}

impl DaemonStatus {
    /// Fold a blackout event into the snapshot
    pub fn apply(&mut self, event: &BlackoutEvent) {
        match event {
            BlackoutEvent::BlackoutEntered => {
                self.blacked = true;
                self.overlay_presented = false;
            }
            BlackoutEvent::OverlayPresented => {
                self.overlay_presented = true;
                self.title = TITLE_BLACKED.to_string();
            }
            BlackoutEvent::PresentationCancelled => {
                self.overlay_presented = false;
            }
            BlackoutEvent::BlackoutExited { .. } => {
                self.blacked = false;
                self.overlay_presented = false;
                self.title = TITLE_RESTORED.to_string();
            }
        }
    }
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            blacked: false,
            overlay_presented: false,
            hotkey_registered: false,
            uptime_secs: 0,
            title: TITLE_IDLE.to_string(),
        }
    }
}
