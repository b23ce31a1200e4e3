//! Events module for blackout transitions
//!
//! Structured events broadcast by the blackout service and pushed to
//! subscribed IPC clients.

use serde::{Deserialize, Serialize};

/// Events emitted by the blackout service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlackoutEvent {
    /// Control strip suppressed, overlay scheduled
    BlackoutEntered,

    /// The deferred overlay presentation ran
    OverlayPresented,

    /// Restore arrived before the overlay was presented
    PresentationCancelled,

    /// Presentation mode restored
    BlackoutExited {
        /// Duration in milliseconds the Touch Bar was blacked out
        duration_ms: u64,
    },
}

impl std::fmt::Display for BlackoutEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlackoutEvent::BlackoutEntered => write!(f, "BLACKOUT_ENTERED"),
            BlackoutEvent::OverlayPresented => write!(f, "OVERLAY_PRESENTED"),
            BlackoutEvent::PresentationCancelled => write!(f, "PRESENTATION_CANCELLED"),
            BlackoutEvent::BlackoutExited { duration_ms } => {
                write!(f, "BLACKOUT_EXITED ({}ms)", duration_ms)
            }
        }
    }
}
