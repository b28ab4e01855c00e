//! strata: keeps every user's metadata tree in step with their files on disk
//! and runs the background upkeep that goes with it.

mod error;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use futures::{StreamExt, pin_mut};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use strata_config::{Config, LogConfig};
use strata_meta::{Database, Repository, UserId};
use strata_storage::BackendHandle;
use strata_storage::backend::LocalBackend;
use strata_vfs::{ScanEvent, Vfs};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "strata", version, about)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON) layered over the defaults
    #[arg(short, long, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Reconcile on startup, then run scans and temp expiry on their intervals
    /// until interrupted (the default)
    Serve,
    /// Reconcile metadata with the disk once
    Scan {
        /// Only this user instead of everybody
        #[arg(short, long)]
        user: Option<UserId>,
    },
    /// Delete expired temp files once
    Expire,
    /// Share paths from one user's tree with other users
    Share {
        #[arg(long)]
        from: UserId,
        #[arg(long = "to", required = true, num_args = 1..)]
        to: Vec<UserId>,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Remove a user's files, metadata and shares
    Purge { user: UserId },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:?}");
            return ExitCode::FAILURE;
        },
    };
    if let Err(e) = init_logging(&config.log) {
        eprintln!("{e:?}");
        return ExitCode::FAILURE;
    }
    match run(cli.command.unwrap_or(Command::Serve), config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "Exiting after failure");
            ExitCode::FAILURE
        },
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).or_raise(|| ErrorKind::Config)?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .or_raise(|| ErrorKind::Logging)
}

async fn run(command: Command, config: Config) -> Result<()> {
    let backend = LocalBackend::new("local", &config.storage.base_directory).or_raise(|| ErrorKind::Storage)?;
    let backend: BackendHandle = Arc::new(backend);
    if let Some(parent) = config.database.path.parent() {
        tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Database)?;
    }
    let db = Database::connect(&config.database.path).await.or_raise(|| ErrorKind::Database)?;
    let vfs = Vfs::new(backend, Repository::from(&db)).with_tmp_folder(config.storage.tmp_folder_name.clone());
    tracing::info!(
        base = %config.storage.base_directory.display(),
        database = %config.database.path.display(),
        "Opened storage"
    );

    let result = match command {
        Command::Serve => serve(&vfs, &config).await,
        Command::Scan { user: Some(user) } => match vfs.scan_user(user).await {
            Ok(_) => Ok(()),
            Err(e) => Err(e).or_raise(|| ErrorKind::Engine),
        },
        Command::Scan { user: None } => scan_everyone(&vfs).await,
        Command::Expire => expire(&vfs, &config).await,
        Command::Share { from, to, paths } => {
            let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
            let outcome = vfs.share_with_users(from, &to, &paths).await;
            for failure in &outcome.failed {
                tracing::warn!(grantee = failure.user, path = %failure.path, error = ?failure.error, "Not shared");
            }
            tracing::info!(shared = outcome.shared.len(), failed = outcome.failed.len(), "Sharing finished");
            Ok(())
        },
        Command::Purge { user } => match vfs.delete_user_files(user).await {
            Ok(_) => Ok(()),
            Err(e) => Err(e).or_raise(|| ErrorKind::Engine),
        },
    };
    db.close().await;
    result
}

/// Scan every user, logging failures per user instead of stopping.
async fn scan_everyone(vfs: &Vfs) -> Result<()> {
    let events = vfs.scan_all();
    pin_mut!(events);
    let mut discovered = false;
    let mut failed = 0_u64;
    while let Some(event) = events.next().await {
        match event {
            Ok(ScanEvent::DiscoveryComplete(users)) => {
                discovered = true;
                tracing::info!(users, "Scanning users");
            },
            Ok(ScanEvent::Scanned { user, report }) if !report.is_clean() => {
                tracing::debug!(owner = user, ?report, "Metadata was out of date");
            },
            Ok(ScanEvent::Complete) => tracing::info!(failed, "Scan complete"),
            Ok(_) => {},
            // Without the list of users there is nothing to carry on with
            Err(e) if !discovered => return Err(e).or_raise(|| ErrorKind::Engine),
            Err(_) => failed += 1,
        }
    }
    Ok(())
}

async fn expire(vfs: &Vfs, config: &Config) -> Result<()> {
    vfs.expire_temp_files(config.storage.tmp_expiry()).await.or_raise(|| ErrorKind::Engine)?;
    Ok(())
}

fn ticker(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    })
}

/// Wait for the next tick, or forever if there is no interval.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        },
        None => std::future::pending().await,
    }
}

async fn serve(vfs: &Vfs, config: &Config) -> Result<()> {
    if config.scan.on_startup {
        scan_everyone(vfs).await?;
    }
    let mut scans = ticker(config.scan.interval());
    let mut maintenance = ticker(config.maintenance.interval());
    tracing::info!(
        scan_every = ?config.scan.interval(),
        maintenance_every = ?config.maintenance.interval(),
        "Running until interrupted"
    );
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.or_raise(|| ErrorKind::Signal)?;
                tracing::info!("Shutting down");
                return Ok(());
            },
            () = tick(&mut scans) => {
                if let Err(e) = scan_everyone(vfs).await {
                    tracing::warn!(error = ?e, "Periodic scan failed");
                }
            },
            () = tick(&mut maintenance) => {
                if let Err(e) = expire(vfs, config).await {
                    tracing::warn!(error = ?e, "Temp expiry failed");
                }
            },
        }
    }
}
