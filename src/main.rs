//! tb-blackout: blanks the macOS Touch Bar on demand
//!
//! Runs in the background and provides:
//! - Double Command tap detection via CGEventTap
//! - A two-state blackout toggle that hides the control strip and presents
//!   an opaque overlay
//! - IPC server accepting the named toggle notification and status queries
//!
//! On shutdown a blacked-out Touch Bar is always restored first.

mod blackout;
mod config;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::blackout::{
    BlackoutController, BlackoutService, Command, DefaultsStore, KillallControlStrip,
    SystemOverlay,
};
use crate::config::Config;
use crate::events::BlackoutEvent;
use crate::hotkey::{DoubleTapDetector, HotkeyListener};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "tb-blackout starting");

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        double_tap_ms = config.double_tap_window.as_millis() as u64,
        delay_ms = config.blackout.presentation_delay.as_millis() as u64,
        dismiss_style = %config.blackout.dismiss_style,
        overlay_helper = ?config.overlay_helper,
        "configuration loaded"
    );
    if config.overlay_helper.is_none() {
        warn!("no overlay helper configured, blackout will only hide the control strip");
    }

    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    // Hotkey listener -> blackout service
    let (hotkey_tx, hotkey_rx) = mpsc::channel(32);
    // IPC server / main -> blackout service
    let (command_tx, command_rx) = mpsc::channel(8);
    // Blackout service -> IPC server (status and subscribers)
    let (event_tx, _event_rx) = broadcast::channel::<BlackoutEvent>(64);

    let controller = BlackoutController::new(
        DefaultsStore::default(),
        KillallControlStrip::default(),
        SystemOverlay::from_helper(config.overlay_helper.clone()),
        config.blackout.clone(),
    );
    let mut service = BlackoutService::new(
        DoubleTapDetector::new(config.double_tap_window),
        controller,
        event_tx.clone(),
    );
    let mut service_task = tokio::spawn(async move { service.run(hotkey_rx, command_rx).await });

    // Start the hotkey listener (runs on dedicated thread)
    let hotkey_listener = HotkeyListener::new(hotkey_tx);
    let hotkey_registered = match hotkey_listener.start() {
        Ok(()) => {
            info!("hotkey listener started");
            true
        }
        Err(e) => {
            error!(?e, "failed to start hotkey listener");
            warn!("continuing without hotkey support - check Accessibility permissions");
            false
        }
    };

    let server = Server::new(
        &config.socket_path,
        command_tx.clone(),
        event_tx.clone(),
        &config.toggle_notification,
    )?;
    server.set_hotkey_registered(hotkey_registered).await;

    let mut status_rx = event_tx.subscribe();

    info!(notification = %config.toggle_notification, "initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Keep the IPC status snapshot in sync with the service
        _ = async {
            loop {
                match status_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "blackout event");
                        server.apply_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("event handler exited");
        }

        result = &mut service_task => {
            if let Err(e) = result {
                error!(?e, "blackout service task failed");
            }
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    hotkey_listener.stop();

    // Restore the Touch Bar before the process goes away
    if !service_task.is_finished() {
        let (done_tx, done_rx) = oneshot::channel();
        if command_tx.send(Command::Shutdown(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
        let _ = service_task.await;
    }

    server.shutdown().await;

    info!("tb-blackout stopped");

    Ok(())
}
