//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::blackout::{
    BlackoutSettings, DismissStyle, DEFAULT_OVERLAY_IDENTIFIER, DEFAULT_PRESENTATION_DELAY,
};
use crate::hotkey::DEFAULT_DOUBLE_TAP_WINDOW;

/// Notification name that requests a toggle
pub const DEFAULT_TOGGLE_NOTIFICATION: &str = "com.local.BlackTouchBar.toggle";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Maximum gap between the two Command presses
    pub double_tap_window: Duration,

    /// Delay, overlay style and identifier for the blackout sequence
    pub blackout: BlackoutSettings,

    /// Executable that performs the system-modal presentation, if any
    pub overlay_helper: Option<PathBuf>,

    /// Name external processes post to request a toggle
    pub toggle_notification: String,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("tb-blackout");

        let socket_path = lookup("TB_BLACKOUT_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let double_tap_window = millis(&lookup, "TB_BLACKOUT_DOUBLE_TAP_MS")?
            .unwrap_or(DEFAULT_DOUBLE_TAP_WINDOW);
        if double_tap_window.is_zero() {
            bail!("TB_BLACKOUT_DOUBLE_TAP_MS must be greater than zero");
        }

        let presentation_delay = millis(&lookup, "TB_BLACKOUT_PRESENT_DELAY_MS")?
            .unwrap_or(DEFAULT_PRESENTATION_DELAY);

        let dismiss_style = match lookup("TB_BLACKOUT_DISMISS_STYLE") {
            Some(raw) => raw
                .parse::<DismissStyle>()
                .context("invalid TB_BLACKOUT_DISMISS_STYLE")?,
            None => DismissStyle::default(),
        };

        let overlay_helper = lookup("TB_BLACKOUT_OVERLAY_HELPER")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        let toggle_notification = lookup("TB_BLACKOUT_NOTIFICATION")
            .unwrap_or_else(|| DEFAULT_TOGGLE_NOTIFICATION.to_string());

        Ok(Self {
            socket_path,
            data_dir,
            double_tap_window,
            blackout: BlackoutSettings {
                presentation_delay,
                dismiss_style,
                overlay_identifier: DEFAULT_OVERLAY_IDENTIFIER.to_string(),
            },
            overlay_helper,
            toggle_notification,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .with_context(|| format!("{key} must be a number of milliseconds, got {raw:?}"))
        })
        .transpose()
}
