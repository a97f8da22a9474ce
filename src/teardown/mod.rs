//! Teardown of a running cfdev environment.
//!
//! Stops the VM-adjacent processes tracked by PID files and asks the
//! privileged daemon to uninstall itself. See [`orchestrator::Teardown`]
//! for the ordering and error aggregation rules.

use std::fmt;
use std::path::PathBuf;

pub mod daemon;
pub mod orchestrator;
pub mod pidfile;
pub mod terminator;

// ---------------------------------------------------------------------------
// Shared types used across submodules
// ---------------------------------------------------------------------------

/// The logical job of a tracked process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    /// linuxkit: manages containers alongside the VM.
    Runtime,
    /// vpnkit: user-space networking for the VM.
    NetworkProxy,
    /// hyperkit: runs the VM itself.
    Hypervisor,
}

impl ProcessRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::NetworkProxy => "network-proxy",
            Self::Hypervisor => "hypervisor",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role bound to the PID file that claims its process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedProcess {
    pub role: ProcessRole,
    pub pid_file: PathBuf,
}

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use daemon::{DaemonClient, DaemonError, DaemonReply};
pub use orchestrator::{Teardown, TeardownError};
pub use terminator::{StopError, Terminator};
