//! One idempotent stop for the whole environment.
//!
//! Steps run in a fixed order: container runtime, network proxy,
//! hypervisor, then the daemon. A failing step is recorded and the next
//! step still runs; the caller gets one combined error at the end. Every
//! step already treats "already stopped" as success, so calling
//! [`Teardown::stop`] again is always safe.
//!
//! Asset provisioning does the opposite and aborts on the first failure.

use std::fmt;

use tracing::{error, info, warn};

use super::daemon::{DaemonClient, DaemonError};
use super::terminator::{StopError, Terminator};
use super::{ProcessRole, TrackedProcess};
use crate::cancel::CancelFlag;
use crate::config::Config;

/// Which part of the teardown a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Process(ProcessRole),
    Daemon,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(role) => write!(f, "{role}"),
            Self::Daemon => f.write_str("cfdevd"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Process(#[from] StopError),
    #[error(transparent)]
    Daemon(#[from] DaemonError),
}

#[derive(Debug)]
pub struct StepFailure {
    pub step: Step,
    pub error: StepError,
}

/// Every step that failed during one [`Teardown::stop`].
#[derive(Debug)]
pub struct TeardownError {
    pub failures: Vec<StepFailure>,
    /// Set when a cancel request stopped the run before its last step.
    pub cancelled: bool,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.as_slice() {
            [] => f.write_str("teardown cancelled")?,
            [only] if !self.cancelled => return write!(f, "{}", only.error),
            failures => {
                write!(f, "{} teardown step(s) failed: ", failures.len())?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}: {}", failure.step, failure.error)?;
                }
                if self.cancelled {
                    f.write_str(" (cancelled before finishing)")?;
                }
            }
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}

/// Collect-all runner: records each step's outcome, never short-circuits.
#[derive(Default)]
struct Failures(Vec<StepFailure>);

impl Failures {
    fn record<E: Into<StepError>>(&mut self, step: Step, result: Result<(), E>) {
        match result {
            Ok(()) => info!(%step, "teardown step finished"),
            Err(e) => {
                let error = e.into();
                error!(%step, error = %error, "teardown step failed");
                self.0.push(StepFailure { step, error });
            }
        }
    }
}

/// Stops every tracked process, then the daemon.
#[derive(Debug, Clone)]
pub struct Teardown {
    processes: Vec<TrackedProcess>,
    terminator: Terminator,
    daemon: DaemonClient,
}

impl Teardown {
    /// `processes` are stopped in the order given.
    pub fn new(processes: Vec<TrackedProcess>, terminator: Terminator, daemon: DaemonClient) -> Self {
        Self {
            processes,
            terminator,
            daemon,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.tracked_processes(),
            Terminator::new(config.stop_timeout),
            DaemonClient::new(&config.daemon_socket, config.daemon_timeout),
        )
    }

    pub async fn stop(&self, cancel: &CancelFlag) -> Result<(), TeardownError> {
        let mut failures = Failures::default();
        let mut cancelled = false;

        for process in &self.processes {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let result = self.terminator.stop(process).await;
            failures.record(Step::Process(process.role), result);
        }

        if cancel.is_cancelled() {
            cancelled = true;
        } else {
            let result = self.daemon.send_uninstall().await;
            failures.record(Step::Daemon, result);
        }

        if cancelled {
            warn!("teardown cancelled before all steps ran");
        }
        if failures.0.is_empty() && !cancelled {
            return Ok(());
        }
        Err(TeardownError {
            failures: failures.0,
            cancelled,
        })
    }
}
