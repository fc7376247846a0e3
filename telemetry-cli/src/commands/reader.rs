//! Bus reader: the queue owner and only producer

use anyhow::{Context, Result};
use std::io;
use std::path::Path;
use telemetry_core::{
    load_channel_table, Decoder, FrameSource, TelemetryMessage, TelemetryPublisher,
};

use crate::bus;
use crate::config::AppConfig;
use crate::lifecycle::ControlFlags;

/// Counters for one producer run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub frames: u64,
    pub published: u64,
    pub skipped: u64,
    pub reloads: u64,
}

pub fn run(config: &AppConfig, flags: &ControlFlags) -> Result<()> {
    let table_path = &config.channels.path;
    let table = load_channel_table(table_path)
        .with_context(|| format!("Failed to load channel table {:?}", table_path))?;
    log::info!("Loaded {} from {:?}", table.stats(), table_path);
    let mut decoder = Decoder::new(table);

    let mut source = bus::open(&config.bus)?;
    let publisher = TelemetryPublisher::create(&config.queue.shm_name, config.queue.reclaim_stale)
        .with_context(|| format!("Failed to create broadcast queue {}", config.queue.shm_name))?;

    let stats = pump(source.as_mut(), &mut decoder, table_path, flags, |msg| {
        publisher.push(msg)
    })?;

    log::info!(
        "Reader stopped: {} frames, {} messages published, {} channels skipped, {} reloads",
        stats.frames,
        stats.published,
        stats.skipped,
        stats.reloads
    );
    // Dropping the publisher unlinks the segment
    Ok(())
}

/// Read, decode and publish until shutdown is requested or the source ends
pub fn pump<F>(
    source: &mut dyn FrameSource,
    decoder: &mut Decoder,
    table_path: &Path,
    flags: &ControlFlags,
    mut publish: F,
) -> Result<PumpStats>
where
    F: FnMut(TelemetryMessage),
{
    let mut stats = PumpStats::default();

    while !flags.should_stop() {
        if flags.take_reload() {
            reload_table(decoder, table_path);
            stats.reloads += 1;
        }

        let frame = match source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                log::info!("{} ended", source.describe());
                break;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read from {}", source.describe()))
            }
        };

        stats.frames += 1;
        let outcome = decoder.decode_frame(&frame, &mut publish);
        stats.published += outcome.decoded as u64;
        stats.skipped += outcome.skipped as u64;
    }

    Ok(stats)
}

/// Swap in a freshly loaded table; on failure keep decoding with the old one
fn reload_table(decoder: &mut Decoder, path: &Path) {
    log::info!("Reloading channel table from {:?}", path);
    match load_channel_table(path) {
        Ok(table) => {
            decoder.replace_table(table);
        }
        Err(e) => log::error!("Reload failed, keeping current table: {}", e),
    }
}
