//! Vehicle Telemetry CLI Application
//!
//! One binary, one role per process:
//! - `reader` owns the broadcast queue, decodes bus frames and publishes them
//! - `logger` drains the queue into a binary session log
//! - `tail` prints live messages
//! - `dump` prints a session log
//! - `channels` prints a channel table

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

mod bus;
mod commands;
mod config;
mod lifecycle;

use config::{AppConfig, StartFrom};
use lifecycle::ControlFlags;

/// Vehicle Telemetry - decode, broadcast and record CAN bus data
#[derive(Parser, Debug)]
#[command(name = "telemetry")]
#[command(
    about = "Real-time CAN telemetry over a shared memory broadcast queue",
    long_about = None
)]
#[command(version)]
struct Args {
    /// Path to configuration file (telemetry.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read the bus, decode frames and publish them (queue owner)
    Reader {
        /// CAN interface (overrides bus.interface)
        #[arg(short, long)]
        interface: Option<String>,

        /// Channel table, .dbc or .json (overrides channels.path)
        #[arg(long, value_name = "FILE")]
        channels: Option<PathBuf>,

        /// Shared memory name (overrides queue.shm_name)
        #[arg(long)]
        shm_name: Option<String>,

        /// Fail instead of replacing a leftover segment
        #[arg(long)]
        no_reclaim: bool,
    },

    /// Persist every message to a binary session log
    Logger {
        /// Log directory (overrides logger.dir)
        #[arg(short, long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Shared memory name (overrides queue.shm_name)
        #[arg(long)]
        shm_name: Option<String>,

        /// Start position (overrides logger.start)
        #[arg(long, value_enum)]
        start: Option<StartFrom>,
    },

    /// Print live messages from the queue
    Tail {
        /// Shared memory name (overrides queue.shm_name)
        #[arg(long)]
        shm_name: Option<String>,

        /// Start position
        #[arg(long, value_enum, default_value_t = StartFrom::Latest)]
        start: StartFrom,

        /// Only print this frame id (hex)
        #[arg(long, value_parser = commands::tail::parse_frame_id)]
        frame_id: Option<u32>,

        /// Exit after printing this many messages
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },

    /// Print the records of a binary session log
    Dump {
        /// Session log file
        file: PathBuf,

        /// Maximum number of records to print
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Load a channel table and print its frames and channels
    Channels {
        /// Channel table, .dbc or .json (defaults to channels.path)
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::debug!("Telemetry CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using telemetry core library v{}", telemetry_core::VERSION);

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };

    match args.command {
        Command::Reader {
            interface,
            channels,
            shm_name,
            no_reclaim,
        } => {
            if let Some(interface) = interface {
                config.bus.interface = interface;
            }
            if let Some(channels) = channels {
                config.channels.path = channels;
            }
            if let Some(shm_name) = shm_name {
                config.queue.shm_name = shm_name;
            }
            if no_reclaim {
                config.queue.reclaim_stale = false;
            }
            config.validate()?;
            let flags = ControlFlags::install()?;
            commands::reader::run(&config, &flags)
        }

        Command::Logger {
            dir,
            shm_name,
            start,
        } => {
            if let Some(dir) = dir {
                config.logger.dir = dir;
            }
            if let Some(shm_name) = shm_name {
                config.queue.shm_name = shm_name;
            }
            if let Some(start) = start {
                config.logger.start = start;
            }
            config.validate()?;
            let flags = ControlFlags::install()?;
            commands::logger::run(&config, &flags)
        }

        Command::Tail {
            shm_name,
            start,
            frame_id,
            count,
        } => {
            let options = commands::tail::TailOptions {
                shm_name: shm_name.unwrap_or(config.queue.shm_name),
                start: start.into(),
                frame_id,
                count,
                poll_interval: Duration::from_millis(config.logger.poll_interval_ms),
            };
            let flags = ControlFlags::install()?;
            commands::tail::run(&options, &flags)
        }

        Command::Dump { file, limit } => commands::dump::run(&file, limit),

        Command::Channels { file } => {
            commands::channels::run(&file.unwrap_or(config.channels.path))
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
