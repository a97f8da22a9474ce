//! cfdev: local Cloud Foundry development environment
//!
//! `cfdev stop` tears down the VM, its helper processes and the privileged
//! cfdevd daemon. `cfdev download` fetches the asset catalog and fills the
//! verified asset cache.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use cfdev::assets::{self, AssetCache, CatalogClient};
use cfdev::cancel::CancelFlag;
use cfdev::config::{Config, Environment};
use cfdev::logging;
use cfdev::teardown::Teardown;

/// Local Cloud Foundry development environment
#[derive(Parser, Debug)]
#[command(name = "cfdev", version, about = "Local Cloud Foundry development environment")]
struct Args {
    /// cfdev home directory (defaults to $CFDEV_HOME, then ~/.cfdev)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stop the VM and its helper processes, and uninstall cfdevd
    Stop,
    /// Download and verify the assets needed to boot the VM
    Download {
        /// Catalog URL, file path or inline JSON (overrides $CFDEV_CATALOG)
        #[arg(long)]
        catalog: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let env = Environment::capture();
    let mut config = Config::resolve(&env, args.home)?;
    if let Command::Download {
        catalog: Some(source),
    } = &args.command
    {
        config.catalog = Some(source.parse().context("invalid --catalog")?);
    }

    let _log_guard = logging::init(&config.paths.logs, config.file_log, args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    let cancel = CancelFlag::new();
    runtime.spawn(cancel_on_ctrl_c(cancel.clone()));

    let result = runtime.block_on(async {
        match args.command {
            Command::Stop => stop(&config, &cancel).await,
            Command::Download { .. } => download(&config, &cancel).await,
        }
    });

    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn stop(config: &Config, cancel: &CancelFlag) -> Result<()> {
    Teardown::from_config(config).stop(cancel).await?;
    println!("cfdev stopped");
    Ok(())
}

async fn download(config: &Config, cancel: &CancelFlag) -> Result<()> {
    let source = config
        .catalog
        .as_ref()
        .context("no asset catalog configured: set CFDEV_CATALOG or pass --catalog")?;

    config
        .paths
        .ensure()
        .context("failed to create the cfdev home")?;

    let http = assets::http_client().context("failed to build HTTP client")?;
    let catalog = CatalogClient::new(http.clone()).fetch(source).await?;
    info!(items = catalog.items.len(), "catalog fetched");

    let cache = AssetCache::from_config(config, http);
    let report = cache.provision(&catalog, cancel).await?;

    println!(
        "Downloaded {} asset(s), {} already cached, into {}",
        report.downloaded.len(),
        report.cached.len(),
        cache.dir().display()
    );
    Ok(())
}

/// Conventional exit status for a process ended by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// The first Ctrl-C asks both pipelines to stop at the next step boundary.
/// A second one exits immediately, even in the middle of a download.
async fn cancel_on_ctrl_c(cancel: CancelFlag) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("interrupt received, stopping after the current step (Ctrl-C again to abort)");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        error!("second interrupt received, aborting");
        std::process::exit(INTERRUPTED_EXIT_CODE);
    }
}
