//! Global hotkey listener using macOS CGEventTap
//!
//! Monitors session-wide modifier flag changes. The tap sees events no
//! matter which application is frontmost, including this one.
//! Runs on a dedicated thread with its own CFRunLoop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::keys::{ModifierEvent, ModifierState};

/// Events sent from the hotkey listener to the blackout service
#[derive(Debug, Clone)]
pub enum HotkeyEvent {
    /// Modifier state has changed
    ModifierChanged(ModifierEvent),
    /// Event tap was disabled by macOS (needs re-registration)
    TapDisabled,
}

/// Global hotkey listener that monitors modifier key press/release events
pub struct HotkeyListener {
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    event_tx: mpsc::Sender<HotkeyEvent>,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    /// Create a new hotkey listener
    pub fn new(event_tx: mpsc::Sender<HotkeyEvent>) -> Self {
        Self {
            event_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the hotkey listener
    ///
    /// This spawns a dedicated thread that runs a CFRunLoop to receive
    /// CGEventTap callbacks. The listener runs until `stop()` is called
    /// or the program exits.
    pub fn start(&self) -> Result<(), HotkeyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        self.spawn_event_loop().inspect_err(|_| {
            self.running.store(false, Ordering::SeqCst);
        })
    }

    #[cfg(target_os = "macos")]
    fn spawn_event_loop(&self) -> Result<(), HotkeyError> {
        use tracing::{error, info};

        let event_tx = self.event_tx.clone();
        let running = Arc::clone(&self.running);

        std::thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");

                if let Err(e) = run_event_loop(event_tx, running.clone()) {
                    error!(?e, "hotkey listener error");
                }

                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        Ok(())
    }

    #[cfg(not(target_os = "macos"))]
    fn spawn_event_loop(&self) -> Result<(), HotkeyError> {
        Err(HotkeyError::Unsupported)
    }

    /// Stop the hotkey listener
    ///
    /// The listener thread notices on its next run loop slice.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[cfg(not(target_os = "macos"))]
    #[error("global hotkeys are only available on macOS")]
    Unsupported,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to attach event tap to the run loop")]
    RunLoopSource,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),
}

/// What the tap callback hands to the run loop thread
#[derive(Debug, Clone, Copy)]
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
enum TapMessage {
    /// Flags changed; stamped inside the callback so run loop slicing
    /// does not skew double-tap timing
    Flags(ModifierState, Instant),
    /// The system disabled the tap
    Disabled,
}

/// Turn a tap message into the event forwarded to the service
///
/// Repeats of `last_state` (e.g. Caps Lock changes) yield nothing.
/// The caller re-enables the tap when `TapDisabled` comes back.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn translate_tap_message(
    message: TapMessage,
    last_state: &mut ModifierState,
) -> Option<HotkeyEvent> {
    match message {
        TapMessage::Flags(new_state, at) => {
            if new_state == *last_state {
                return None;
            }
            debug!(?last_state, ?new_state, "modifier state changed");
            *last_state = new_state;
            Some(HotkeyEvent::ModifierChanged(new_state.at(at)))
        }
        TapMessage::Disabled => {
            warn!("event tap disabled by the system, re-enabling");
            Some(HotkeyEvent::TapDisabled)
        }
    }
}

/// Run the CFRunLoop with the event tap
#[cfg(target_os = "macos")]
fn run_event_loop(
    event_tx: mpsc::Sender<HotkeyEvent>,
    running: Arc<AtomicBool>,
) -> Result<(), HotkeyError> {
    use std::time::Duration;

    use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
    use core_graphics::event::{
        CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement,
        CGEventTapProxy, CGEventType,
    };
    use tracing::{error, info};

    let mut last_state = ModifierState::default();

    let (callback_tx, callback_rx) = std::sync::mpsc::channel::<TapMessage>();

    // CGEventTap callback - must be fast and non-blocking
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
                         -> Option<CGEvent> {
        match event_type {
            CGEventType::FlagsChanged => {
                let state = ModifierState::from_flags(event.get_flags());
                let _ = callback_tx.send(TapMessage::Flags(state, Instant::now()));
            }
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                let _ = callback_tx.send(TapMessage::Disabled);
            }
            _ => {}
        }
        Some(event.clone())
    };

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::FlagsChanged],
        callback,
    )
    .map_err(|_| {
        error!("failed to create event tap - is Accessibility permission granted?");
        HotkeyError::EventTapCreation
    })?;

    tap.enable();

    let run_loop_source = tap
        .mach_port
        .create_runloop_source(0)
        .map_err(|_| HotkeyError::RunLoopSource)?;
    let run_loop = CFRunLoop::get_current();

    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }

    info!("event tap created and enabled");

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
        }

        while let Ok(message) = callback_rx.try_recv() {
            let Some(event) = translate_tap_message(message, &mut last_state) else {
                continue;
            };
            if matches!(event, HotkeyEvent::TapDisabled) {
                tap.enable();
            }

            // Not in an async context here
            if event_tx.blocking_send(event).is_err() {
                warn!("failed to send hotkey event - channel closed?");
                running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_creation() {
        let (tx, _rx) = mpsc::channel(32);
        let listener = HotkeyListener::new(tx);
        assert!(!listener.is_running());
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_start_unsupported_off_macos() {
        let (tx, _rx) = mpsc::channel(32);
        let listener = HotkeyListener::new(tx);
        assert!(matches!(listener.start(), Err(HotkeyError::Unsupported)));
        assert!(!listener.is_running());
    }

    fn command(down: bool) -> ModifierState {
        ModifierState {
            command: down,
            ..Default::default()
        }
    }

    #[test]
    fn test_flags_change_is_forwarded_with_callback_time() {
        let mut last_state = ModifierState::default();
        let at = Instant::now();

        let event = translate_tap_message(TapMessage::Flags(command(true), at), &mut last_state);

        match event {
            Some(HotkeyEvent::ModifierChanged(event)) => {
                assert!(event.command_down);
                assert!(!event.other_modifiers_down);
                assert_eq!(event.timestamp, at);
            }
            other => panic!("expected a modifier change, got {other:?}"),
        }
        assert_eq!(last_state, command(true));
    }

    #[test]
    fn test_repeated_state_is_dropped() {
        let mut last_state = command(true);

        let event = translate_tap_message(
            TapMessage::Flags(command(true), Instant::now()),
            &mut last_state,
        );

        assert!(event.is_none());
        assert_eq!(last_state, command(true));
    }

    #[test]
    fn test_release_after_press_is_forwarded() {
        let mut last_state = ModifierState::default();
        let start = Instant::now();

        let pressed = translate_tap_message(TapMessage::Flags(command(true), start), &mut last_state);
        let released = translate_tap_message(
            TapMessage::Flags(command(false), start + std::time::Duration::from_millis(50)),
            &mut last_state,
        );

        assert!(matches!(pressed, Some(HotkeyEvent::ModifierChanged(e)) if e.command_down));
        assert!(matches!(released, Some(HotkeyEvent::ModifierChanged(e)) if !e.command_down));
        assert_eq!(last_state, ModifierState::default());
    }

    #[test]
    fn test_other_modifier_marks_event() {
        let mut last_state = command(true);
        let state = ModifierState {
            command: true,
            option: true,
            ..Default::default()
        };

        let event = translate_tap_message(
            TapMessage::Flags(state, Instant::now()),
            &mut last_state,
        );

        assert!(matches!(
            event,
            Some(HotkeyEvent::ModifierChanged(e)) if e.command_down && e.other_modifiers_down
        ));
    }

    #[test]
    fn test_disabled_tap_is_reported_and_keeps_state() {
        let mut last_state = command(true);

        let event = translate_tap_message(TapMessage::Disabled, &mut last_state);

        assert!(matches!(event, Some(HotkeyEvent::TapDisabled)));
        assert_eq!(last_state, command(true));

        // The next real change is still compared against the held state
        let repeat = translate_tap_message(
            TapMessage::Flags(command(true), Instant::now()),
            &mut last_state,
        );
        assert!(repeat.is_none());
    }
}
