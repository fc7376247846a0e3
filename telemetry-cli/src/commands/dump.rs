//! Print the records of a binary session log

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::Path;
use telemetry_core::{LogEntry, LogReader};

pub fn run(path: &Path, limit: Option<usize>) -> Result<()> {
    let reader = LogReader::open(path).with_context(|| format!("Failed to open {:?}", path))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut count = 0usize;
    let mut first_last: Option<(i64, i64)> = None;

    for entry in reader.take(limit.unwrap_or(usize::MAX)) {
        let entry = entry?;
        if let Err(e) = writeln!(out, "{}", format_entry(&entry)) {
            if e.kind() == io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(e).context("Failed to write to stdout");
        }
        count += 1;
        first_last = Some(match first_last {
            None => (entry.timestamp_ms, entry.timestamp_ms),
            Some((first, _)) => (first, entry.timestamp_ms),
        });
    }

    match first_last {
        Some((first, last)) => log::info!(
            "{} records spanning {:.3} s in {:?}",
            count,
            (last - first) as f64 / 1000.0,
            path
        ),
        None => log::info!("{:?} contains no records", path),
    }
    Ok(())
}

pub fn format_entry(entry: &LogEntry) -> String {
    format!(
        "{}  can_id=0x{:03X}  value={}",
        entry.timestamp().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        entry.frame_id,
        entry.value
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_entry() {
        let entry = LogEntry::new(1_700_000_000_123, 0x123, 98.6);
        assert_eq!(
            format_entry(&entry),
            "2023-11-14T22:13:20.123Z  can_id=0x123  value=98.6"
        );
    }

    #[test]
    fn test_dump_missing_file_fails() {
        assert!(run(Path::new("/nonexistent/session.bin"), None).is_err());
    }
}
