//! cfdev: provisions and tears down a local VM-based Cloud Foundry
//! development environment.
//!
//! Two pipelines live here:
//!
//! - [`teardown`] stops the hypervisor, network proxy and container runtime
//!   tracked by PID files, then tells the privileged cfdevd daemon to
//!   uninstall. Every step runs even if an earlier one failed.
//! - [`assets`] fetches the asset catalog and downloads each item into the
//!   cache, aborting on the first checksum mismatch.

pub mod assets;
pub mod cancel;
pub mod config;
pub mod logging;
pub mod paths;
pub mod teardown;
