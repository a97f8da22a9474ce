//! Stops one tracked process identified by its PID file.
//!
//! ```text
//! stop(TrackedProcess)
//!     ├─► pidfile::read        missing file → done
//!     ├─► SIGTERM              ESRCH → already gone, done
//!     ├─► poll liveness        until the grace period runs out
//!     ├─► SIGKILL              if still alive
//!     └─► pidfile::remove      always, once a signal was attempted
//! ```
//!
//! A process that is already gone is never an error. Only a process that
//! is confirmed alive and cannot be signalled, or survives SIGKILL, fails
//! the step.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::pidfile::{self, PidFileError};
use super::{ProcessRole, TrackedProcess};

/// How long to wait after SIGKILL before giving up on a process.
const KILL_GRACE: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum StopError {
    #[error(transparent)]
    PidFile(#[from] PidFileError),
    #[error("failed to signal {role} (pid {pid}): {source}")]
    Signal {
        role: ProcessRole,
        pid: i32,
        #[source]
        source: std::io::Error,
    },
    #[error("{role} (pid {pid}) still running after {waited:?}")]
    Timeout {
        role: ProcessRole,
        pid: i32,
        waited: Duration,
    },
}

/// Signals tracked processes and waits, bounded, for them to exit.
#[derive(Debug, Clone)]
pub struct Terminator {
    grace: Duration,
}

impl Terminator {
    /// `grace` bounds the wait between SIGTERM and SIGKILL.
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub async fn stop(&self, process: &TrackedProcess) -> Result<(), StopError> {
        let pid = match pidfile::read(&process.pid_file) {
            Ok(Some(pid)) => pid,
            Ok(None) => {
                debug!(role = %process.role, path = %process.pid_file.display(), "no pid file, nothing to stop");
                return Ok(());
            }
            Err(e) => {
                // A file we cannot interpret would block the next start.
                if let Err(remove_err) = pidfile::remove(&process.pid_file) {
                    warn!(role = %process.role, error = %remove_err, "failed to remove unreadable pid file");
                }
                return Err(e.into());
            }
        };

        let outcome = self.terminate(process.role, pid).await;
        let removed = pidfile::remove(&process.pid_file);
        settle(process, outcome, removed)
    }

    async fn terminate(&self, role: ProcessRole, pid: i32) -> Result<(), StopError> {
        if !self.deliver(role, pid, sys::Signal::Term)? {
            info!(%role, pid, "process already exited");
            return Ok(());
        }
        if wait_for_exit(pid, self.grace).await {
            info!(%role, pid, "process stopped");
            return Ok(());
        }

        warn!(%role, pid, grace = ?self.grace, "process ignored SIGTERM, killing");
        if !self.deliver(role, pid, sys::Signal::Kill)? {
            return Ok(());
        }
        if wait_for_exit(pid, KILL_GRACE).await {
            info!(%role, pid, "process killed");
            return Ok(());
        }

        Err(StopError::Timeout {
            role,
            pid,
            waited: self.grace + KILL_GRACE,
        })
    }

    /// Returns `Ok(false)` when there was no process left to signal.
    fn deliver(&self, role: ProcessRole, pid: i32, signal: sys::Signal) -> Result<bool, StopError> {
        match sys::send(pid, signal) {
            Ok(sys::Delivery::Delivered) => Ok(true),
            Ok(sys::Delivery::NotRunning) => Ok(false),
            Err(_) if !sys::is_alive(pid) => Ok(false),
            Err(source) => Err(StopError::Signal { role, pid, source }),
        }
    }
}

/// The signalling error wins; a removal failure behind it is only logged.
fn settle(
    process: &TrackedProcess,
    outcome: Result<(), StopError>,
    removed: Result<(), PidFileError>,
) -> Result<(), StopError> {
    match (outcome, removed) {
        (Err(e), Err(remove_err)) => {
            warn!(
                role = %process.role,
                path = %process.pid_file.display(),
                error = %remove_err,
                "failed to remove pid file after a failed stop"
            );
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), removed) => removed.map_err(StopError::from),
    }
}

/// Poll until `pid` is gone or `limit` elapses. Returns `true` on exit.
async fn wait_for_exit(pid: i32, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if !sys::is_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

// ---------------------------------------------------------------------------
// Unix signalling
// ---------------------------------------------------------------------------

#[cfg(unix)]
mod sys {
    use nix::errno::Errno;
    use nix::sys::signal::{self, kill};
    use nix::unistd::Pid;

    #[derive(Debug, Clone, Copy)]
    pub enum Signal {
        Term,
        Kill,
    }

    pub enum Delivery {
        Delivered,
        NotRunning,
    }

    pub fn send(pid: i32, signal: Signal) -> std::io::Result<Delivery> {
        let signal = match signal {
            Signal::Term => signal::Signal::SIGTERM,
            Signal::Kill => signal::Signal::SIGKILL,
        };
        match kill(Pid::from_raw(pid), signal) {
            Ok(()) => Ok(Delivery::Delivered),
            Err(Errno::ESRCH) => Ok(Delivery::NotRunning),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_alive(pid: i32) -> bool {
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => !is_zombie(pid),
            Err(Errno::ESRCH) => false,
            // EPERM: the process exists but belongs to someone else.
            Err(_) => true,
        }
    }

    /// An exited but unreaped child still answers signal 0.
    #[cfg(target_os = "linux")]
    fn is_zombie(pid: i32) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| {
                stat.rsplit_once(')')
                    .map(|(_, rest)| rest.trim_start().starts_with('Z'))
            })
            .unwrap_or(false)
    }

    #[cfg(not(target_os = "linux"))]
    fn is_zombie(_pid: i32) -> bool {
        false
    }
}

#[cfg(not(unix))]
mod sys {
    #[derive(Debug, Clone, Copy)]
    pub enum Signal {
        Term,
        Kill,
    }

    pub enum Delivery {
        Delivered,
        NotRunning,
    }

    pub fn send(_pid: i32, _signal: Signal) -> std::io::Result<Delivery> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "process termination requires a Unix host",
        ))
    }

    pub fn is_alive(_pid: i32) -> bool {
        true
    }
}
