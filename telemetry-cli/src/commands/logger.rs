//! Durable consumer: drains the queue into a binary session log

use anyhow::{Context, Result};
use std::time::Duration;
use telemetry_core::{DrainStats, LogError, LogWriter, TelemetryMessage, TelemetrySubscriber};

use crate::config::AppConfig;
use crate::lifecycle::ControlFlags;

pub fn run(config: &AppConfig, flags: &ControlFlags) -> Result<()> {
    let shm_name = &config.queue.shm_name;
    let mut subscriber = TelemetrySubscriber::open(shm_name, config.logger.start.into())
        .with_context(|| format!("Failed to attach to broadcast queue {}", shm_name))?;

    // No consuming without a place to persist
    let mut writer = LogWriter::create(&config.logger.dir)
        .with_context(|| format!("Failed to open session log in {:?}", config.logger.dir))?;

    let idle = Duration::from_millis(config.logger.poll_interval_ms);
    while !flags.should_stop() {
        let stats = persist_batch(&mut writer, |f| subscriber.drain(f))?;
        if stats.delivered == 0 {
            std::thread::sleep(idle);
        }
    }

    // Whatever arrived between the last poll and the shutdown request
    persist_batch(&mut writer, |f| subscriber.drain(f))?;
    log::info!(
        "Logger stopped: {} records in {}, {} messages lost to overwrite",
        writer.records(),
        writer.path().display(),
        subscriber.cursor().dropped_total()
    );
    Ok(())
}

/// Write one drained batch and flush it if it was non-empty
pub fn persist_batch<D>(writer: &mut LogWriter, drain: D) -> Result<DrainStats>
where
    D: FnOnce(&mut dyn FnMut(&TelemetryMessage)) -> DrainStats,
{
    let mut failure: Option<LogError> = None;
    let stats = drain(&mut |msg: &TelemetryMessage| {
        if failure.is_none() {
            if let Err(e) = writer.write(msg.frame_id, msg.value) {
                failure = Some(e);
            }
        }
    });

    if let Some(e) = failure {
        return Err(e).context("Failed to append to session log");
    }
    if stats.dropped > 0 {
        log::warn!("Fell behind the producer, {} messages lost", stats.dropped);
    }
    if stats.delivered > 0 {
        writer.flush().context("Failed to flush session log")?;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_core::{BroadcastQueue, LogReader, StartPosition};

    #[test]
    fn test_batches_are_persisted_and_flushed() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut writer = LogWriter::create(dir.path()).unwrap();
        let queue = BroadcastQueue::<TelemetryMessage, 16>::new_boxed();
        let mut cursor = queue.cursor(StartPosition::Latest);

        let stats = persist_batch(&mut writer, |f| queue.consume(&mut cursor, f)).unwrap();
        assert!(stats.is_empty());

        for i in 0..3u32 {
            unsafe { queue.push(TelemetryMessage::new(0x123, 0, 98.6 + i as f64)) };
        }
        let stats = persist_batch(&mut writer, |f| queue.consume(&mut cursor, f)).unwrap();
        assert_eq!(stats.delivered, 3);

        // Flushed already, readable without dropping the writer
        let entries: Vec<_> = LogReader::open(writer.path())
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].frame_id, 0x123);
        assert_eq!(entries[0].value.to_bits(), 98.6f64.to_bits());
    }

    #[test]
    fn test_lost_messages_are_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut writer = LogWriter::create(dir.path()).unwrap();
        let queue = BroadcastQueue::<TelemetryMessage, 4>::new_boxed();
        let mut cursor = queue.cursor(StartPosition::Beginning);

        for i in 0..6u64 {
            unsafe { queue.push(TelemetryMessage::new(1, i, 0.0)) };
        }
        let stats = persist_batch(&mut writer, |f| queue.consume(&mut cursor, f)).unwrap();
        assert_eq!(stats, DrainStats { delivered: 4, dropped: 2 });
        assert_eq!(writer.records(), 4);
    }
}
