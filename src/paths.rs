//! Directory structure for a cfdev home.
//!
//! Everything cfdev persists lives under a single home directory
//! (`$CFDEV_HOME`, default `~/.cfdev/`):
//!
//! - State:  `<home>/state/`  PID files of the VM-adjacent processes
//! - Cache:  `<home>/cache/`  verified boot assets, one file per catalog item
//! - Logs:   `<home>/logs/`   `cfdev.log` when `CFDEV_LOG=1`

use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_HOME_DIR: &str = ".cfdev";

/// All resolved directories for one cfdev home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfdevPaths {
    /// Root of everything cfdev writes.
    pub home: PathBuf,
    /// PID files for the hypervisor, network proxy and container runtime.
    pub state: PathBuf,
    /// Downloaded and verified catalog assets.
    pub cache: PathBuf,
    /// Application logs
    pub logs: PathBuf,
}

impl CfdevPaths {
    /// Lay out the standard subdirectories under `home`.
    /// Does not create any directories; call `ensure()` for that.
    pub fn under(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            state: home.join("state"),
            cache: home.join("cache"),
            logs: home.join("logs"),
            home,
        }
    }

    /// Default home: `~/.cfdev/`. `None` when `$HOME` is unset.
    pub fn default_home(user_home: Option<&Path>) -> Option<PathBuf> {
        user_home.map(|home| home.join(DEFAULT_HOME_DIR))
    }

    /// Create all directories that don't already exist.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.home, &self.state, &self.cache, &self.logs] {
            std::fs::create_dir_all(dir)?;
            debug!("ensured directory: {}", dir.display());
        }
        Ok(())
    }
}
