//! Binary entrypoint: NAV event engine export script.
//!
//! By default reads the event engine's alert stream from stdin until EOF or
//! a termination signal. `--test-api`, `--sync-report` and `--sync` are
//! one-shot maintenance modes that never touch stdin.
//!
//! Exit codes: 0 on normal end of input or signal, 2 on configuration
//! errors, 3 when Argus or NAV can't be reached at startup, 1 otherwise,
//! including a stdin read error.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use navargus::config::DEFAULT_CONFIG_FILE;
use navargus::pipeline::{self, Exit, Message, Pipeline};
use navargus::resync::{self, Snapshot};
use navargus::{ArgusClient, Config, ConfigError, NavClient, Reconciler, ResyncError, StoreError};

#[derive(Parser)]
#[command(name = "navargus", version)]
#[command(about = "Export NAV alerts to Argus incidents")]
#[command(group(ArgGroup::new("mode").args(["test_api", "sync_report", "sync"])))]
struct Cli {
  /// Configuration file
  #[arg(short, long, env = "NAVARGUS_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
  config: PathBuf,

  /// Verify that the Argus API is reachable with the configured token, then exit
  #[arg(long)]
  test_api: bool,

  /// Print which NAV alerts and Argus incidents are out of sync, then exit
  #[arg(long)]
  sync_report: bool,

  /// Run one full resync, then exit
  #[arg(long)]
  sync: bool,

  /// Debug logging (RUST_LOG takes precedence)
  #[arg(short, long)]
  verbose: bool,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  match run(&cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("{:#}", e);
      ExitCode::from(exit_code(&e))
    }
  }
}

fn init_logging(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .with_target(false)
    .init();
}

fn exit_code(e: &anyhow::Error) -> u8 {
  if e.downcast_ref::<ConfigError>().is_some() {
    2
  } else if e.downcast_ref::<StoreError>().is_some() || e.downcast_ref::<ResyncError>().is_some() {
    3
  } else {
    1
  }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
  let config = Config::load(&cli.config)?;

  let (url, token) = config.api.endpoint()?;
  let argus = ArgusClient::new(url, token, config.api.request_timeout())?;
  if cli.test_api {
    argus.test_access().context("Argus API is not accessible")?;
    info!(url = argus.base_url(), "Argus API is accessible");
    return Ok(());
  }

  let (url, token) = config.nav.endpoint()?;
  let nav = NavClient::new(url, token, config.nav.request_timeout())?;
  let reconciler = Reconciler::new(argus, config.policy());

  if cli.sync_report {
    let filters = reconciler.policy().filters;
    let snapshot = Snapshot::fetch(reconciler.store(), &nav, &filters)?;
    let mut out = io::stdout().lock();
    resync::write_report(&resync::plan(&snapshot, &filters), &mut out)?;
    out.flush()?;
    return Ok(());
  }

  if cli.sync {
    resync::run(&reconciler, &nav)?;
    return Ok(());
  }

  stream(Pipeline::new(reconciler, nav, config.sync_interval()))
}

fn stream(mut pipeline: Pipeline<ArgusClient, NavClient>) -> anyhow::Result<()> {
  pipeline.startup().context("initial resync failed")?;

  let (tx, rx) = mpsc::sync_channel(1);
  let signal = tx.clone();
  ctrlc::set_handler(move || {
    let _ = signal.send(Message::Shutdown);
  })
  .context("installing signal handler")?;

  // The reader thread stays blocked in read() on shutdown; process exit reaps it.
  pipeline::spawn_reader(io::stdin(), tx).context("spawning stdin reader")?;

  match pipeline.run(&rx) {
    Exit::EndOfInput => info!("Event engine closed the stream, exiting"),
    Exit::Shutdown => info!("Terminated by signal, exiting"),
    Exit::InputFailed => anyhow::bail!("lost the event engine stream"),
  }
  Ok(())
}
