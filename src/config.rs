//! Configuration for a cfdev invocation.
//!
//! [`Config`] is a plain value built once in `main` and passed down to the
//! teardown and provisioning code. Environment variables are read in exactly
//! one place, [`Environment::capture`], so tests can build configurations
//! side by side without touching process state.
//!
//! Resolution order, later wins:
//!
//! 1. built-in defaults under the cfdev home (`~/.cfdev/`)
//! 2. `<home>/config.toml`
//! 3. `CFDEV_CATALOG`
//! 4. command-line flags (applied by `main`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::assets::catalog::CatalogSource;
use crate::paths::CfdevPaths;
use crate::teardown::{ProcessRole, TrackedProcess};

/// Where cfdevd listens unless the config file says otherwise.
pub const DEFAULT_DAEMON_SOCKET: &str = "/var/tmp/cfdevd.socket";

const CONFIG_FILE_NAME: &str = "config.toml";
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DAEMON_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

/// The slice of process environment cfdev cares about.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// `$HOME`
    pub user_home: Option<PathBuf>,
    /// `$CFDEV_HOME`
    pub cfdev_home: Option<PathBuf>,
    /// `$CFDEV_CATALOG`
    pub catalog: Option<String>,
    /// `$CFDEV_LOG == "1"`
    pub file_log: bool,
}

impl Environment {
    pub fn capture() -> Self {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            user_home: non_empty("HOME").map(PathBuf::from),
            cfdev_home: non_empty("CFDEV_HOME").map(PathBuf::from),
            catalog: non_empty("CFDEV_CATALOG"),
            file_log: std::env::var("CFDEV_LOG").as_deref() == Ok("1"),
        }
    }
}

/// Optional overrides read from `<home>/config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    daemon_socket: Option<PathBuf>,
    catalog: Option<String>,
    stop_timeout_secs: Option<u64>,
    daemon_timeout_secs: Option<u64>,
    download_concurrency: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub paths: CfdevPaths,
    pub runtime_pid_file: PathBuf,
    pub network_proxy_pid_file: PathBuf,
    pub hypervisor_pid_file: PathBuf,
    pub daemon_socket: PathBuf,
    /// `None` until a catalog is configured; `download` refuses to run without one.
    pub catalog: Option<CatalogSource>,
    /// Grace period between SIGTERM and SIGKILL.
    pub stop_timeout: Duration,
    /// Bound on each step of the daemon exchange.
    pub daemon_timeout: Duration,
    /// Downloads allowed in flight at once.
    pub download_concurrency: usize,
    pub file_log: bool,
}

impl Config {
    /// Defaults for an explicit cfdev home. Reads nothing from disk.
    pub fn for_home(home: impl Into<PathBuf>) -> Self {
        let paths = CfdevPaths::under(home);
        Self {
            runtime_pid_file: paths.state.join("linuxkit.pid"),
            network_proxy_pid_file: paths.state.join("vpnkit.pid"),
            hypervisor_pid_file: paths.state.join("hyperkit.pid"),
            paths,
            daemon_socket: PathBuf::from(DEFAULT_DAEMON_SOCKET),
            catalog: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            daemon_timeout: DEFAULT_DAEMON_TIMEOUT,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            file_log: false,
        }
    }

    /// Build the configuration for this invocation.
    ///
    /// `home_override` is the `--home` flag and beats `CFDEV_HOME`.
    pub fn resolve(env: &Environment, home_override: Option<PathBuf>) -> Result<Self> {
        let home = home_override
            .or_else(|| env.cfdev_home.clone())
            .or_else(|| CfdevPaths::default_home(env.user_home.as_deref()))
            .context("cannot locate the cfdev home: neither CFDEV_HOME nor HOME is set")?;

        let mut config = Self::for_home(home);
        config.file_log = env.file_log;

        let file_path = config.paths.home.join(CONFIG_FILE_NAME);
        if let Some(file) = load_file(&file_path)? {
            config
                .apply(file)
                .with_context(|| format!("invalid config file {}", file_path.display()))?;
        }

        if let Some(catalog) = &env.catalog {
            config.catalog = Some(catalog.parse().context("invalid CFDEV_CATALOG")?);
        }

        Ok(config)
    }

    /// The tracked processes in teardown order.
    pub fn tracked_processes(&self) -> Vec<TrackedProcess> {
        vec![
            TrackedProcess {
                role: ProcessRole::Runtime,
                pid_file: self.runtime_pid_file.clone(),
            },
            TrackedProcess {
                role: ProcessRole::NetworkProxy,
                pid_file: self.network_proxy_pid_file.clone(),
            },
            TrackedProcess {
                role: ProcessRole::Hypervisor,
                pid_file: self.hypervisor_pid_file.clone(),
            },
        ]
    }

    fn apply(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(socket) = file.daemon_socket {
            self.daemon_socket = socket;
        }
        if let Some(catalog) = file.catalog {
            self.catalog = Some(catalog.parse().context("invalid catalog")?);
        }
        if let Some(secs) = file.stop_timeout_secs {
            self.stop_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.daemon_timeout_secs {
            self.daemon_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = file.download_concurrency {
            if n == 0 {
                bail!("download_concurrency must be at least 1");
            }
            self.download_concurrency = n;
        }
        Ok(())
    }
}

fn load_file(path: &Path) -> Result<Option<ConfigFile>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    let file = toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(file))
}
