//! Audible cue played when a tracked job reaches a terminal status.
//!
//! Playback is cosmetic: every failure is logged at debug level and dropped.
//! Once-per-job gating is the tracker's job, see `JobStatusTracker`.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("playback command is empty")]
    EmptyCommand,
    #[error("playback failed: {0}")]
    Playback(#[from] std::io::Error),
    #[error("playback blocked: {0}")]
    Blocked(String),
}

/// Something that can play a short cue.
pub trait Notifier: Send + Sync {
    fn play(&self) -> Result<(), NotifyError>;
}

/// Rings the terminal bell on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl Notifier for TerminalBell {
    fn play(&self) -> Result<(), NotifyError> {
        let mut stderr = std::io::stderr();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        Ok(())
    }
}

/// Plays nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn play(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Spawns an external player (e.g. `paplay complete.oga`) without waiting on it.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    pub fn new(command: &[String]) -> Result<Self, NotifyError> {
        let (program, args) = command.split_first().ok_or(NotifyError::EmptyCommand)?;
        if program.trim().is_empty() {
            return Err(NotifyError::EmptyCommand);
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Notifier for CommandNotifier {
    fn play(&self) -> Result<(), NotifyError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        // Reap the player off-thread so repeated cues don't leave zombies.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}

/// Fire-and-forget wrapper around a `Notifier`.
#[derive(Clone)]
pub struct NotificationEffect {
    notifier: Arc<dyn Notifier>,
}

impl NotificationEffect {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn silent() -> Self {
        Self::new(Arc::new(SilentNotifier))
    }

    /// Play the cue, swallowing any failure.
    pub fn fire(&self) {
        if let Err(err) = self.notifier.play() {
            debug!("notification cue not played: {err}");
        }
    }
}

impl std::fmt::Debug for NotificationEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationEffect").finish_non_exhaustive()
    }
}
