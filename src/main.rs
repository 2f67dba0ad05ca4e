use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use fieldsync::cache::{SqliteStore, Tier, TierManager, TierStore};
use fieldsync::config::Config;
use fieldsync::fetch::{Fetch, FetchRequest, NetworkClient};
use fieldsync::queue::OfflineQueue;
use fieldsync::sync::SyncCoordinator;

#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(about = "Operate the FieldSales offline store: precache, purge, drain, inspect")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fieldsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch and cache the critical resources into the static partition
  Install,
  /// Drop every cache partition that is not part of the current version
  Activate,
  /// Replay the offline write queue now
  Sync,
  /// Show queue depth and per-tier entry counts
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  std::fs::create_dir_all(config.data_dir()?)?;
  let _guard = init_tracing(&config)?;

  match args.command {
    Command::Install => install(&config).await,
    Command::Activate => activate(&config),
    Command::Sync => sync(&config).await,
    Command::Status => status(&config),
  }
}

fn init_tracing(config: &Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let appender = tracing_appender::rolling::daily(config.data_dir()?, "fieldsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer.and(std::io::stderr))
    .with_ansi(false)
    .init();

  // The guard keeps the appender flushing for the life of the process.
  Ok(guard)
}

fn tiers(config: &Config) -> Result<TierManager<SqliteStore>> {
  let store = Arc::new(SqliteStore::open_at(&config.tiers_db_path()?)?);
  Ok(TierManager::new(store, &config.app, config.cache_version))
}

async fn install(config: &Config) -> Result<()> {
  let tiers = tiers(config)?;
  let net = NetworkClient::new(config.request_timeout())?;

  let cached = tiers
    .install(&config.base_url()?, &config.precache, |url| {
      let net = net.clone();
      async move { net.fetch(&FetchRequest::get(&url)).await }
    })
    .await;

  println!("precached {} of {} resources", cached, config.precache.len());
  Ok(())
}

fn activate(config: &Config) -> Result<()> {
  let tiers = tiers(config)?;
  let dropped = tiers.activate()?;

  if dropped.is_empty() {
    println!("no stale partitions");
  } else {
    for name in dropped {
      println!("dropped {}", name);
    }
  }
  Ok(())
}

async fn sync(config: &Config) -> Result<()> {
  let queue = Arc::new(OfflineQueue::open_at(&config.queue_db_path()?)?);
  let coordinator = SyncCoordinator::new(Arc::clone(&queue));
  let net = NetworkClient::new(config.request_timeout())?;

  let outcomes = coordinator
    .replay(|item| {
      let net = net.clone();
      async move { net.fetch(&item.to_request()).await }
    })
    .await?;

  if outcomes.is_empty() {
    println!("offline queue empty");
    return Ok(());
  }

  for outcome in &outcomes {
    if outcome.success {
      println!("synced  {}", outcome.url);
    } else {
      println!("failed  {} ({:?})", outcome.url, outcome.error);
    }
  }
  println!("{} still queued", queue.len()?);
  Ok(())
}

fn status(config: &Config) -> Result<()> {
  let tiers = tiers(config)?;
  let queue = OfflineQueue::open_at(&config.queue_db_path()?)?;

  println!("offline queue: {} pending", queue.len()?);
  for tier in Tier::ALL {
    let partition = tiers.partition(tier);
    println!("{}: {} entries", partition, tiers.store().count(&partition)?);
  }
  Ok(())
}
