use std::io;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Stopped,
    AlreadyStopped,
    StillRunning,
}

impl GuardOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::AlreadyStopped => "not-running",
            Self::StillRunning => "still-running",
        }
    }
}

pub trait ProcessControl {
    /// Sends a terminate signal; `Ok(false)` when no such process was running.
    fn terminate(&self, name: &str) -> io::Result<bool>;
    fn is_running(&self, name: &str) -> io::Result<bool>;
}

/// Uses `taskkill`/`tasklist` on Windows and `pkill`/`pgrep` elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessControl;

impl ProcessControl for SystemProcessControl {
    fn terminate(&self, name: &str) -> io::Result<bool> {
        let status = build_terminate_command(name).output()?.status;
        match status.code() {
            Some(0) => Ok(true),
            // pkill: no match; taskkill: process not found
            Some(1) | Some(128) => Ok(false),
            _ => Err(io::Error::other(format!(
                "terminate command for '{name}' exited with {status}"
            ))),
        }
    }

    fn is_running(&self, name: &str) -> io::Result<bool> {
        let output = build_query_command(name).output()?;
        if cfg!(windows) {
            let stdout = String::from_utf8_lossy(&output.stdout).to_ascii_lowercase();
            return Ok(stdout.contains(&name.to_ascii_lowercase()));
        }
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(io::Error::other(format!(
                "process query for '{name}' exited with {}",
                output.status
            ))),
        }
    }
}

pub(crate) fn build_terminate_command(name: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("taskkill");
        command.arg("/F").arg("/IM").arg(name);
        command
    } else {
        let mut command = Command::new("pkill");
        command.arg("-x").arg(name);
        command
    }
}

pub(crate) fn build_query_command(name: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("tasklist");
        command
            .arg("/FI")
            .arg(format!("IMAGENAME eq {name}"))
            .arg("/NH");
        command
    } else {
        let mut command = Command::new("pgrep");
        command.arg("-x").arg(name);
        command
    }
}

pub struct ProcessGuard<'a> {
    control: &'a dyn ProcessControl,
    poll_interval: Duration,
}

impl<'a> ProcessGuard<'a> {
    pub fn new(control: &'a dyn ProcessControl) -> Self {
        Self {
            control,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Best effort; never fails. A process that was not running counts as stopped.
    pub fn ensure_stopped(&self, name: &str, max_wait: Duration) -> GuardOutcome {
        let was_running = match self.control.terminate(name) {
            Ok(was_running) => was_running,
            Err(err) => {
                warn!(process = name, error = %err, "terminate request failed");
                true
            }
        };
        if !was_running {
            debug!(process = name, "process was not running");
            return GuardOutcome::AlreadyStopped;
        }

        let deadline = Instant::now() + max_wait;
        loop {
            match self.control.is_running(name) {
                Ok(false) => {
                    info!(process = name, "process stopped");
                    return GuardOutcome::Stopped;
                }
                Ok(true) => {}
                Err(err) => warn!(process = name, error = %err, "process query failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                return GuardOutcome::StillRunning;
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}
