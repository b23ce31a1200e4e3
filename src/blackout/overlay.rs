//! Full-screen Touch Bar overlay capability
//!
//! The system-modal presentation itself lives behind undocumented OS calls,
//! so the service only sees `present` / `dismiss`. When no adapter is
//! available the overlay degrades to a no-op and the blackout falls back to
//! hiding the control strip alone.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::system::{run_quiet, SystemError};

/// Default identifier of the blackout Touch Bar item
pub const DEFAULT_OVERLAY_IDENTIFIER: &str = "com.local.blackout";

/// How a presented overlay is taken down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissStyle {
    /// Remove the system-modal bar entirely
    #[default]
    Dismiss,
    /// Collapse it into the system tray item
    Minimize,
}

impl DismissStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            DismissStyle::Dismiss => "dismiss",
            DismissStyle::Minimize => "minimize",
        }
    }
}

impl fmt::Display for DismissStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DismissStyle {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dismiss" => Ok(DismissStyle::Dismiss),
            "minimize" => Ok(DismissStyle::Minimize),
            other => Err(OverlayError::UnknownDismissStyle(other.to_string())),
        }
    }
}

/// Errors from the overlay capability
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("system-modal Touch Bar presentation is not available")]
    Unsupported,

    #[error("overlay helper failed: {0}")]
    Helper(#[from] SystemError),

    #[error("unknown dismiss style {0:?} (expected \"dismiss\" or \"minimize\")")]
    UnknownDismissStyle(String),
}

/// Present / dismiss pair for the opaque overlay
pub trait Overlay {
    fn present(&self, identifier: &str) -> Result<(), OverlayError>;
    fn dismiss(&self, style: DismissStyle) -> Result<(), OverlayError>;
}

/// Fallback when the running system offers no presentation adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedOverlay;

impl Overlay for UnsupportedOverlay {
    fn present(&self, _identifier: &str) -> Result<(), OverlayError> {
        Err(OverlayError::Unsupported)
    }

    fn dismiss(&self, _style: DismissStyle) -> Result<(), OverlayError> {
        Err(OverlayError::Unsupported)
    }
}

/// Delegates presentation to an external helper executable:
/// `<helper> present <identifier>` and `<helper> dismiss|minimize`
#[derive(Debug, Clone)]
pub struct CommandOverlay {
    helper: PathBuf,
}

impl CommandOverlay {
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
        }
    }
}

impl Overlay for CommandOverlay {
    fn present(&self, identifier: &str) -> Result<(), OverlayError> {
        Ok(run_quiet(&self.helper, &["present", identifier])?)
    }

    fn dismiss(&self, style: DismissStyle) -> Result<(), OverlayError> {
        Ok(run_quiet(&self.helper, &[style.as_str()])?)
    }
}

/// Overlay picked from configuration
#[derive(Debug, Clone)]
pub enum SystemOverlay {
    Helper(CommandOverlay),
    Unsupported(UnsupportedOverlay),
}

impl SystemOverlay {
    pub fn from_helper(helper: Option<PathBuf>) -> Self {
        match helper {
            Some(path) => SystemOverlay::Helper(CommandOverlay::new(path)),
            None => SystemOverlay::Unsupported(UnsupportedOverlay),
        }
    }
}

impl Overlay for SystemOverlay {
    fn present(&self, identifier: &str) -> Result<(), OverlayError> {
        match self {
            SystemOverlay::Helper(overlay) => overlay.present(identifier),
            SystemOverlay::Unsupported(overlay) => overlay.present(identifier),
        }
    }

    fn dismiss(&self, style: DismissStyle) -> Result<(), OverlayError> {
        match self {
            SystemOverlay::Helper(overlay) => overlay.dismiss(style),
            SystemOverlay::Unsupported(overlay) => overlay.dismiss(style),
        }
    }
}
