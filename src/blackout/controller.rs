//! Blackout controller
//!
//! Two states, `normal` and `blacked`. Entering hides the control strip and
//! schedules the opaque overlay; the overlay is presented later, once the
//! restarted ControlStrip process has come back. Every system effect is
//! best-effort: failures are logged and the sequence carries on.
//!
//! Invariant: while blacked, the overlay is either shown or pending; while
//! normal, neither.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::overlay::{DismissStyle, Overlay, OverlayError, DEFAULT_OVERLAY_IDENTIFIER};
use super::system::{ControlStrip, DisplayModeStore, APP_ONLY_MODE, FALLBACK_MODE};

/// Delay before presenting the overlay; must outlast the ControlStrip respawn
pub const DEFAULT_PRESENTATION_DELAY: Duration = Duration::from_millis(500);

/// Tunables for the blackout sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlackoutSettings {
    pub presentation_delay: Duration,
    pub dismiss_style: DismissStyle,
    pub overlay_identifier: String,
}

impl Default for BlackoutSettings {
    fn default() -> Self {
        Self {
            presentation_delay: DEFAULT_PRESENTATION_DELAY,
            dismiss_style: DismissStyle::default(),
            overlay_identifier: DEFAULT_OVERLAY_IDENTIFIER.to_string(),
        }
    }
}

/// A deferred overlay presentation
///
/// Only the schedule whose token matches the controller's pending one can
/// present; a cancelled or superseded schedule is inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledPresentation {
    token: u64,
    deadline: Instant,
}

impl ScheduledPresentation {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presentation {
    Idle,
    Pending(ScheduledPresentation),
    Shown,
}

/// Outcome of leaving the blacked state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// A scheduled presentation was dropped before it fired
    pub cancelled_presentation: bool,
    /// Mode written back to the preference
    pub restored_mode: String,
    /// Time spent blacked (zero if it never was)
    pub blacked_for: Duration,
}

/// Result of a toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Entered(ScheduledPresentation),
    Exited(ExitReport),
}

/// Owns the blackout state and sequences the system effects
pub struct BlackoutController<S, C, O> {
    store: S,
    strip: C,
    overlay: O,
    settings: BlackoutSettings,
    is_blacked: bool,
    /// Presentation mode captured on entry, consumed on exit
    saved_display_mode: Option<String>,
    presentation: Presentation,
    next_token: u64,
    blacked_since: Option<Instant>,
}

impl<S, C, O> BlackoutController<S, C, O>
where
    S: DisplayModeStore,
    C: ControlStrip,
    O: Overlay,
{
    pub fn new(store: S, strip: C, overlay: O, settings: BlackoutSettings) -> Self {
        Self {
            store,
            strip,
            overlay,
            settings,
            is_blacked: false,
            saved_display_mode: None,
            presentation: Presentation::Idle,
            next_token: 0,
            blacked_since: None,
        }
    }

    pub fn is_blacked(&self) -> bool {
        self.is_blacked
    }

    #[cfg(test)]
    pub fn saved_display_mode(&self) -> Option<&str> {
        self.saved_display_mode.as_deref()
    }

    pub fn overlay_presented(&self) -> bool {
        self.presentation == Presentation::Shown
    }

    /// The presentation waiting for its deadline, if any
    pub fn pending_presentation(&self) -> Option<ScheduledPresentation> {
        match self.presentation {
            Presentation::Pending(scheduled) => Some(scheduled),
            _ => None,
        }
    }

    /// Flip between normal and blacked
    pub fn toggle(&mut self, now: Instant) -> Transition {
        match self.enter_blackout(now) {
            Some(scheduled) => Transition::Entered(scheduled),
            None => Transition::Exited(self.exit_blackout(now)),
        }
    }

    /// Enter the blacked state; `None` if already blacked
    pub fn enter_blackout(&mut self, now: Instant) -> Option<ScheduledPresentation> {
        if self.is_blacked {
            debug!("already blacked");
            return None;
        }

        self.saved_display_mode = match self.store.read_mode() {
            Ok(mode) => Some(mode),
            Err(e) => {
                warn!(error = %e, "could not read presentation mode");
                None
            }
        };

        if let Err(e) = self.store.write_mode(APP_ONLY_MODE) {
            warn!(error = %e, "could not switch presentation mode");
        }
        self.restart_control_strip();

        self.next_token = self.next_token.wrapping_add(1);
        let scheduled = ScheduledPresentation {
            token: self.next_token,
            deadline: now + self.settings.presentation_delay,
        };

        self.is_blacked = true;
        self.presentation = Presentation::Pending(scheduled);
        self.blacked_since = Some(now);

        info!(
            saved_mode = ?self.saved_display_mode,
            delay_ms = self.settings.presentation_delay.as_millis() as u64,
            "blackout entered"
        );

        Some(scheduled)
    }

    /// Present the overlay for `scheduled` if it is still the pending one
    ///
    /// Returns whether a presentation was attempted.
    pub fn fire_presentation(&mut self, scheduled: ScheduledPresentation) -> bool {
        if self.presentation != Presentation::Pending(scheduled) {
            debug!("stale presentation ignored");
            return false;
        }

        match self.overlay.present(&self.settings.overlay_identifier) {
            Ok(()) => info!(identifier = %self.settings.overlay_identifier, "overlay presented"),
            Err(OverlayError::Unsupported) => debug!("overlay presentation unavailable"),
            Err(e) => warn!(error = %e, "overlay presentation failed"),
        }
        self.presentation = Presentation::Shown;
        true
    }

    /// Leave the blacked state and restore the captured presentation mode
    ///
    /// Also valid when not blacked: the preference is restored to the
    /// captured value or the fallback mode.
    pub fn exit_blackout(&mut self, now: Instant) -> ExitReport {
        let cancelled_presentation = matches!(self.presentation, Presentation::Pending(_));
        if cancelled_presentation {
            debug!("pending presentation cancelled");
        }

        if self.presentation == Presentation::Shown {
            match self.overlay.dismiss(self.settings.dismiss_style) {
                Ok(()) => debug!(style = %self.settings.dismiss_style, "overlay dismissed"),
                Err(OverlayError::Unsupported) => {}
                Err(e) => warn!(error = %e, "overlay dismissal failed"),
            }
        }
        self.presentation = Presentation::Idle;

        let restored_mode = self
            .saved_display_mode
            .take()
            .unwrap_or_else(|| FALLBACK_MODE.to_string());
        if let Err(e) = self.store.write_mode(&restored_mode) {
            warn!(error = %e, "could not restore presentation mode");
        }
        self.restart_control_strip();

        let blacked_for = self
            .blacked_since
            .take()
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        self.is_blacked = false;

        info!(
            restored_mode = %restored_mode,
            duration_ms = blacked_for.as_millis() as u64,
            "blackout exited"
        );

        ExitReport {
            cancelled_presentation,
            restored_mode,
            blacked_for,
        }
    }

    /// Termination hook: never leave the system in the suppressed mode
    pub fn shutdown(&mut self, now: Instant) -> Option<ExitReport> {
        if self.is_blacked {
            Some(self.exit_blackout(now))
        } else {
            None
        }
    }

    fn restart_control_strip(&self) {
        if let Err(e) = self.strip.restart() {
            warn!(error = %e, "could not restart control strip");
        }
    }
}
