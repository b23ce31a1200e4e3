//! Blackout module: the two-state Touch Bar blackout toggle
//!
//! - `controller`: enter/exit sequencing against the system effects
//! - `service`: single task that owns the gesture detector and controller,
//!   and fires the deferred overlay presentation
//! - `system` / `overlay`: the effectful collaborators behind traits

mod controller;
mod overlay;
mod service;
mod system;

pub use controller::{BlackoutController, BlackoutSettings, DEFAULT_PRESENTATION_DELAY};
pub use overlay::{DismissStyle, SystemOverlay, DEFAULT_OVERLAY_IDENTIFIER};
pub use service::{BlackoutService, Command, TriggerSource};
pub use system::{DefaultsStore, KillallControlStrip};
