//! Command-line entry point.
//!
//! - `skiff sync <remote> <repository>` mirrors a configured remote and
//!   finalizes a new repository version.
//! - `skiff show <repository> [version]` lists a repository's versions, or
//!   the tags and content of one version.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use exn::{OptionExt, ResultExt};
use skiff_config::Config;
use skiff_content::{Database, Repository, StoreHandle};
use skiff_storage::BackendHandle;
use skiff_storage::backend::LocalBackend;
use skiff_sync::{Task, synchronize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not open the content database")]
    Database,
    #[display("could not open artifact storage")]
    Storage,
    #[display("sync failed")]
    Sync,
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
}

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Parser, Debug)]
#[command(name = "skiff", version, about = "Mirror container registries into versioned repositories")]
struct Cli {
    /// Configuration file (`.toml`, `.yaml` or `.json`)
    #[arg(short, long, global = true, value_name = "PATH", env = "SKIFF_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mirror a configured remote into a repository
    Sync {
        /// Name of the remote in the configuration
        remote: String,
        /// Repository to finalize the new version in
        repository: String,
    },
    /// Show a repository's versions, or one version in detail
    Show {
        repository: String,
        version: Option<u64>,
    },
}

fn setup_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn,skiff=info,skiff_sync=info",
            1 => "info,skiff_sync=debug",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);
    let result = match Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config) {
        Ok(config) => match cli.command {
            Command::Sync { remote, repository } => sync(&config, &remote, &repository).await,
            Command::Show { repository, version } => show(&config, &repository, version).await,
        },
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "{e}");
            ExitCode::FAILURE
        },
    }
}

async fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Database)?;
    }
    Database::connect(path).await.or_raise(|| ErrorKind::Database)
}

async fn sync(config: &Config, remote: &str, repository: &str) -> Result<()> {
    // Everything the task needs from configuration is checked before any
    // store is opened.
    let task = Task::new(config, remote, repository).or_raise(|| ErrorKind::Config)?;
    let database = open_database(&config.database).await?;
    let root = std::path::absolute(&config.storage).or_raise(|| ErrorKind::Storage)?;
    let storage: BackendHandle = Arc::new(LocalBackend::new("local", root).or_raise(|| ErrorKind::Storage)?);
    let store: StoreHandle = Arc::new(Repository::from(&database));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling sync");
            interrupt.cancel();
        }
    });

    info!(remote = task.remote(), upstream = task.upstream(), url = task.url(), "syncing");
    let report = synchronize(&task, store, storage, &cancel).await.or_raise(|| ErrorKind::Sync);
    database.close().await;
    print!("{}", report?);
    Ok(())
}

async fn show(config: &Config, repository: &str, version: Option<u64>) -> Result<()> {
    let database = open_database(&config.database).await?;
    let repo = Repository::from(&database);
    let Some(number) = version else {
        let versions = repo.versions(repository).await.or_raise(|| ErrorKind::Database)?;
        if versions.is_empty() {
            exn::bail!(ErrorKind::NotFound(format!("repository {repository}")));
        }
        for version in versions {
            println!("{repository} v{:<5} {:>6} units  {}", version.number, version.content_count, version.created_at);
        }
        return Ok(());
    };
    let version = repo
        .version(repository, number)
        .await
        .or_raise(|| ErrorKind::Database)?
        .ok_or_raise(|| ErrorKind::NotFound(format!("{repository} version {number}")))?;
    println!("{repository} v{} ({} units, {})", version.number, version.content_count, version.created_at);
    for tag in repo.version_tags(version.id).await.or_raise(|| ErrorKind::Database)? {
        println!("  tag {:<24} → {} {}", tag.name, tag.target_kind, tag.target_key);
    }
    for content in repo.version_content(version.id).await.or_raise(|| ErrorKind::Database)? {
        println!("  {:<14} {}", content.kind.as_str(), content.key);
    }
    Ok(())
}
