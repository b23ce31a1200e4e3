//! System side effects: the Touch Bar presentation-mode preference and the
//! ControlStrip helper process
//!
//! Both are driven through the stock command line tools and wait for them
//! to exit. Output other than the preference value is discarded.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use tracing::debug;

/// Preference domain owned by the Touch Bar agent
pub const PREFERENCE_DOMAIN: &str = "com.apple.touchbar.agent";
/// Key holding the global Touch Bar presentation mode
pub const PRESENTATION_MODE_KEY: &str = "PresentationModeGlobal";
/// Helper process that renders the default Touch Bar controls
pub const CONTROL_STRIP_PROCESS: &str = "ControlStrip";

/// Mode that hides the control strip and shows only app content
pub const APP_ONLY_MODE: &str = "app";
/// Mode restored when no previous value was captured
pub const FALLBACK_MODE: &str = "functionKeys";

/// Errors from external tool invocations
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: ExitStatus },

    #[error("{program} printed no value")]
    EmptyOutput { program: String },
}

/// Read and write access to the Touch Bar presentation mode
pub trait DisplayModeStore {
    fn read_mode(&self) -> Result<String, SystemError>;
    fn write_mode(&self, mode: &str) -> Result<(), SystemError>;
}

/// Restarts the control strip so a mode change takes effect
pub trait ControlStrip {
    fn restart(&self) -> Result<(), SystemError>;
}

/// Run a program to completion with all output discarded
pub(crate) fn run_quiet(program: &Path, args: &[&str]) -> Result<(), SystemError> {
    debug!(?program, ?args, "running");
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|source| SystemError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(SystemError::Failed {
            program: program.display().to_string(),
            status,
        })
    }
}

/// `defaults(1)` backed preference access
#[derive(Debug, Clone)]
pub struct DefaultsStore {
    program: PathBuf,
    domain: String,
    key: String,
}

impl DefaultsStore {
    pub fn new(program: impl Into<PathBuf>, domain: &str, key: &str) -> Self {
        Self {
            program: program.into(),
            domain: domain.to_string(),
            key: key.to_string(),
        }
    }
}

impl Default for DefaultsStore {
    fn default() -> Self {
        Self::new("/usr/bin/defaults", PREFERENCE_DOMAIN, PRESENTATION_MODE_KEY)
    }
}

impl DisplayModeStore for DefaultsStore {
    fn read_mode(&self) -> Result<String, SystemError> {
        let program = self.program.display().to_string();
        let output = Command::new(&self.program)
            .args(["read", &self.domain, &self.key])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|source| SystemError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SystemError::Failed {
                program,
                status: output.status,
            });
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() {
            return Err(SystemError::EmptyOutput { program });
        }
        Ok(value)
    }

    fn write_mode(&self, mode: &str) -> Result<(), SystemError> {
        run_quiet(
            &self.program,
            &["write", &self.domain, &self.key, "-string", mode],
        )
    }
}

/// `killall(1)` backed control strip restart; launchd respawns the process
#[derive(Debug, Clone)]
pub struct KillallControlStrip {
    program: PathBuf,
    process: String,
}

impl KillallControlStrip {
    pub fn new(program: impl Into<PathBuf>, process: &str) -> Self {
        Self {
            program: program.into(),
            process: process.to_string(),
        }
    }
}

impl Default for KillallControlStrip {
    fn default() -> Self {
        Self::new("/usr/bin/killall", CONTROL_STRIP_PROCESS)
    }
}

impl ControlStrip for KillallControlStrip {
    fn restart(&self) -> Result<(), SystemError> {
        run_quiet(&self.program, &[&self.process])
    }
}
