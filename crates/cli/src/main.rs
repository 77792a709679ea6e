#![forbid(unsafe_code)]

mod cli;
mod error;
mod signals;
mod steam;

use a2s::Scheduler;
use clap::Parser;
use cli::Cli;
use config::Config;
use error::Error;
use flume::bounded;
use signals::{forward, wait_for_signal};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Mutex;
use steam::SteamFeed;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_log::AsTrace;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracker::{NoQuery, PlayerQuery, Services, SystemClock, Tracker};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn init_logging(cli: &Cli) -> Result<(), Error> {
    let writer = match &cli.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| Error::LogFile {
                    path: path.clone(),
                    source,
                })?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(io::stderr),
    };
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity.log_level_filter().as_trace())
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(cli.logfile.is_none())
        .with_writer(writer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    debug!(config = ?cli);

    let mut config = match &cli.conffile {
        Some(path) => Config::load(path)?,
        _ => Config::new(),
    };
    if let Some(dir) = &cli.data_dir {
        config.tracker.data_dir.clone_from(dir);
    }

    if cli.dump_config {
        io::stdout().write_all(config.to_toml()?.as_bytes())?;
        return Ok(());
    }
    if config.feed.key.is_empty() {
        warn!("feed.key is empty, the Steam Web API will refuse the request");
    }

    let query: Box<dyn PlayerQuery + Send + Sync> = if config.query.enabled {
        Box::new(Scheduler::bind(&config.query).await?)
    } else {
        Box::new(NoQuery)
    };
    let services = Services {
        feed: Box::new(SteamFeed::new(config.feed.clone())?),
        query,
        clock: Box::new(SystemClock),
    };
    let mut tracker = Tracker::load(config, services)?;

    if cli.once {
        let report = tracker.tick().await?;
        info!(?report, "single poll done");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let (events_tx, events_rx) = bounded(8);
    let (control_tx, control_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Err(err) = wait_for_signal(&events_tx).await {
            error!(error = ?err, "Error while waiting for signal");
        }
    });
    tokio::spawn(forward(events_rx, control_tx, cancel.clone()));

    tracker.run_until(cancel, control_rx).await?;
    info!("tracker stopped");
    Ok(())
}
