//! Blackout service
//!
//! The single task that owns the gesture detector and the controller.
//! Modifier events, external toggle requests and the shutdown request all
//! arrive over channels, and the deferred overlay presentation is a deadline
//! polled by the same loop, so nothing else ever touches blackout state.

use std::future;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time;
use tracing::{debug, info, warn};

use crate::events::BlackoutEvent;
use crate::hotkey::{DoubleTapDetector, HotkeyEvent};

use super::controller::{BlackoutController, ExitReport, ScheduledPresentation, Transition};
use super::overlay::Overlay;
use super::system::{ControlStrip, DisplayModeStore};

/// Where a toggle request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Double Command tap
    Gesture,
    /// Named toggle notification over IPC
    Notification,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSource::Gesture => write!(f, "gesture"),
            TriggerSource::Notification => write!(f, "notification"),
        }
    }
}

/// Requests marshaled onto the service task
#[derive(Debug)]
pub enum Command {
    Toggle(TriggerSource),
    /// Run the termination hook, then acknowledge and stop
    Shutdown(oneshot::Sender<()>),
}

pub struct BlackoutService<S, C, O> {
    detector: DoubleTapDetector,
    controller: BlackoutController<S, C, O>,
    /// Channel for emitting blackout events
    event_tx: broadcast::Sender<BlackoutEvent>,
}

impl<S, C, O> BlackoutService<S, C, O>
where
    S: DisplayModeStore,
    C: ControlStrip,
    O: Overlay,
{
    pub fn new(
        detector: DoubleTapDetector,
        controller: BlackoutController<S, C, O>,
        event_tx: broadcast::Sender<BlackoutEvent>,
    ) -> Self {
        Self {
            detector,
            controller,
            event_tx,
        }
    }

    /// Run until a shutdown command arrives or the command channel closes
    ///
    /// Either way the termination hook runs before returning.
    pub async fn run(
        &mut self,
        mut hotkey_rx: mpsc::Receiver<HotkeyEvent>,
        mut command_rx: mpsc::Receiver<Command>,
    ) {
        info!("blackout service started");
        let mut hotkeys_open = true;

        loop {
            let pending = self.controller.pending_presentation();
            let presentation_due = async move {
                match pending {
                    Some(scheduled) => {
                        time::sleep_until(scheduled.deadline().into()).await;
                        scheduled
                    }
                    None => future::pending().await,
                }
            };

            tokio::select! {
                event = hotkey_rx.recv(), if hotkeys_open => match event {
                    Some(event) => self.handle_hotkey(event),
                    None => {
                        warn!("hotkey channel closed, only external toggles remain");
                        hotkeys_open = false;
                    }
                },
                command = command_rx.recv() => match command {
                    Some(Command::Toggle(source)) => self.toggle(source),
                    Some(Command::Shutdown(done)) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        debug!("command channel closed");
                        self.shutdown();
                        break;
                    }
                },
                scheduled = presentation_due => self.present(scheduled),
            }
        }

        info!("blackout service stopped");
    }

    fn handle_hotkey(&mut self, event: HotkeyEvent) {
        match event {
            HotkeyEvent::ModifierChanged(modifiers) => {
                if self.detector.on_modifier_event(&modifiers).is_some() {
                    self.toggle(TriggerSource::Gesture);
                }
            }
            HotkeyEvent::TapDisabled => {
                warn!("hotkey tap disabled, events may be missed");
            }
        }
    }

    fn toggle(&mut self, source: TriggerSource) {
        let transition = self.controller.toggle(now());
        info!(%source, blacked = self.controller.is_blacked(), "toggled");
        match transition {
            Transition::Entered(_) => self.emit(BlackoutEvent::BlackoutEntered),
            Transition::Exited(report) => self.emit_exit(report),
        }
    }

    fn present(&mut self, scheduled: ScheduledPresentation) {
        if self.controller.fire_presentation(scheduled) {
            self.emit(BlackoutEvent::OverlayPresented);
        }
    }

    fn shutdown(&mut self) {
        let overlay_was_shown = self.controller.overlay_presented();
        if let Some(report) = self.controller.shutdown(now()) {
            info!(overlay_was_shown, "restored Touch Bar before exit");
            self.emit_exit(report);
        }
    }

    fn emit_exit(&self, report: ExitReport) {
        if report.cancelled_presentation {
            self.emit(BlackoutEvent::PresentationCancelled);
        }
        self.emit(BlackoutEvent::BlackoutExited {
            duration_ms: report.blacked_for.as_millis() as u64,
        });
    }

    fn emit(&self, event: BlackoutEvent) {
        debug!(%event, "emitting event");
        let _ = self.event_tx.send(event);
    }
}

/// Current time on the runtime clock (follows tokio's paused clock in tests)
fn now() -> Instant {
    time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::task::JoinHandle;

    use super::*;
    use crate::blackout::controller::BlackoutSettings;
    use crate::blackout::testing::{Effect, FakeSystem};
    use crate::hotkey::ModifierState;

    struct Harness {
        fake: FakeSystem,
        hotkey_tx: mpsc::Sender<HotkeyEvent>,
        command_tx: mpsc::Sender<Command>,
        event_rx: broadcast::Receiver<BlackoutEvent>,
        handle: JoinHandle<()>,
    }

    fn spawn_service(mode: Option<&str>) -> Harness {
        let fake = FakeSystem::new(mode);
        let controller = BlackoutController::new(
            fake.clone(),
            fake.clone(),
            fake.clone(),
            BlackoutSettings::default(),
        );
        let (event_tx, event_rx) = broadcast::channel(16);
        let (hotkey_tx, hotkey_rx) = mpsc::channel(16);
        let (command_tx, command_rx) = mpsc::channel(16);

        let mut service = BlackoutService::new(DoubleTapDetector::default(), controller, event_tx);
        let handle = tokio::spawn(async move { service.run(hotkey_rx, command_rx).await });

        Harness {
            fake,
            hotkey_tx,
            command_tx,
            event_rx,
            handle,
        }
    }

    fn command_event(command: bool, at: Instant) -> HotkeyEvent {
        let state = ModifierState {
            command,
            ..Default::default()
        };
        HotkeyEvent::ModifierChanged(state.at(at))
    }

    async fn double_tap(tx: &mpsc::Sender<HotkeyEvent>) {
        let start = Instant::now();
        for (ms, down) in [(0, true), (50, false), (200, true), (250, false)] {
            tx.send(command_event(down, start + Duration::from_millis(ms)))
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_tap_blacks_out_then_presents() {
        let mut h = spawn_service(Some("fullControlStrip"));

        double_tap(&h.hotkey_tx).await;

        assert_eq!(h.event_rx.recv().await.unwrap(), BlackoutEvent::BlackoutEntered);
        assert_eq!(h.fake.mode().as_deref(), Some("app"));
        assert!(!h.fake.presented());

        // Paused clock auto-advances to the presentation deadline
        assert_eq!(h.event_rx.recv().await.unwrap(), BlackoutEvent::OverlayPresented);
        assert!(h.fake.presented());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_tap_does_nothing() {
        let mut h = spawn_service(Some("fullControlStrip"));
        let start = Instant::now();
        h.hotkey_tx.send(command_event(true, start)).await.unwrap();
        h.hotkey_tx
            .send(command_event(false, start + Duration::from_millis(50)))
            .await
            .unwrap();

        time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(
            h.event_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert!(h.fake.effects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_before_delay_cancels_presentation() {
        let mut h = spawn_service(Some("fullControlStrip"));

        h.command_tx
            .send(Command::Toggle(TriggerSource::Notification))
            .await
            .unwrap();
        h.command_tx
            .send(Command::Toggle(TriggerSource::Notification))
            .await
            .unwrap();

        assert_eq!(h.event_rx.recv().await.unwrap(), BlackoutEvent::BlackoutEntered);
        assert_eq!(h.event_rx.recv().await.unwrap(), BlackoutEvent::PresentationCancelled);
        assert!(matches!(
            h.event_rx.recv().await.unwrap(),
            BlackoutEvent::BlackoutExited { .. }
        ));

        // Well past the original deadline
        time::sleep(Duration::from_secs(2)).await;
        assert!(!h.fake.presented());
        assert_eq!(h.fake.mode().as_deref(), Some("fullControlStrip"));
        assert!(matches!(
            h.event_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gesture_and_notification_share_state() {
        let mut h = spawn_service(Some("fullControlStrip"));

        double_tap(&h.hotkey_tx).await;
        assert_eq!(h.event_rx.recv().await.unwrap(), BlackoutEvent::BlackoutEntered);
        assert_eq!(h.event_rx.recv().await.unwrap(), BlackoutEvent::OverlayPresented);

        h.command_tx
            .send(Command::Toggle(TriggerSource::Notification))
            .await
            .unwrap();
        assert!(matches!(
            h.event_rx.recv().await.unwrap(),
            BlackoutEvent::BlackoutExited { duration_ms } if duration_ms >= 500
        ));
        assert!(h.fake.effects().contains(&Effect::Dismiss(Default::default())));
        assert_eq!(h.fake.mode().as_deref(), Some("fullControlStrip"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_restores_blacked_touch_bar() {
        let mut h = spawn_service(Some("fullControlStrip"));

        h.command_tx
            .send(Command::Toggle(TriggerSource::Notification))
            .await
            .unwrap();
        assert_eq!(h.event_rx.recv().await.unwrap(), BlackoutEvent::BlackoutEntered);
        assert_eq!(h.event_rx.recv().await.unwrap(), BlackoutEvent::OverlayPresented);

        let (done_tx, done_rx) = oneshot::channel();
        h.command_tx.send(Command::Shutdown(done_tx)).await.unwrap();
        done_rx.await.unwrap();
        h.handle.await.unwrap();

        assert!(matches!(
            h.event_rx.recv().await.unwrap(),
            BlackoutEvent::BlackoutExited { .. }
        ));
        assert_eq!(h.fake.mode().as_deref(), Some("fullControlStrip"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_when_normal_touches_nothing() {
        let h = spawn_service(Some("fullControlStrip"));

        let (done_tx, done_rx) = oneshot::channel();
        h.command_tx.send(Command::Shutdown(done_tx)).await.unwrap();
        done_rx.await.unwrap();
        h.handle.await.unwrap();

        assert!(h.fake.effects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_command_channel_runs_termination_hook() {
        let mut h = spawn_service(None);

        h.command_tx
            .send(Command::Toggle(TriggerSource::Notification))
            .await
            .unwrap();
        assert_eq!(h.event_rx.recv().await.unwrap(), BlackoutEvent::BlackoutEntered);

        drop(h.command_tx);
        h.handle.await.unwrap();

        assert_eq!(h.fake.mode().as_deref(), Some("functionKeys"));
        assert!(!h.fake.presented());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggles_still_work_without_hotkeys() {
        let mut h = spawn_service(Some("fullControlStrip"));
        drop(h.hotkey_tx);

        h.command_tx
            .send(Command::Toggle(TriggerSource::Notification))
            .await
            .unwrap();
        assert_eq!(h.event_rx.recv().await.unwrap(), BlackoutEvent::BlackoutEntered);
    }
}
