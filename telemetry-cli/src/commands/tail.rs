//! Diagnostic consumer printing live messages

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::time::Duration;
use telemetry_core::{StartPosition, TelemetryMessage, TelemetrySubscriber};

use crate::lifecycle::ControlFlags;

pub struct TailOptions {
    pub shm_name: String,
    pub start: StartPosition,
    pub frame_id: Option<u32>,
    pub count: Option<u64>,
    pub poll_interval: Duration,
}

pub fn run(options: &TailOptions, flags: &ControlFlags) -> Result<()> {
    let mut subscriber = TelemetrySubscriber::open(&options.shm_name, options.start)
        .with_context(|| format!("Failed to attach to broadcast queue {}", options.shm_name))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut printed = 0u64;

    while !flags.should_stop() {
        let mut write_err = None;
        let stats = subscriber.drain(|msg| {
            if write_err.is_some() || !wants_more(options, printed) {
                return;
            }
            if options.frame_id.is_some_and(|id| id != msg.frame_id) {
                return;
            }
            match writeln!(out, "{}", format_line(msg)) {
                Ok(()) => printed += 1,
                Err(e) => write_err = Some(e),
            }
        });

        match write_err {
            // Reader of our stdout went away (e.g. piped into head)
            Some(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
            Some(e) => return Err(e).context("Failed to write to stdout"),
            None => {}
        }
        if stats.dropped > 0 {
            log::warn!("{} messages lost, tail fell behind", stats.dropped);
        }
        if !wants_more(options, printed) {
            break;
        }
        if stats.delivered == 0 {
            std::thread::sleep(options.poll_interval);
        } else {
            out.flush().ok();
        }
    }
    Ok(())
}

/// Whether more lines are wanted
fn wants_more(options: &TailOptions, printed: u64) -> bool {
    options.count.map_or(true, |limit| printed < limit)
}

pub fn format_line(msg: &TelemetryMessage) -> String {
    msg.to_string()
}

/// Parse a frame id given as hex (`0x100`, `100`)
pub fn parse_frame_id(s: &str) -> Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid frame id {s:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line() {
        let msg = TelemetryMessage::new(0x123, 0, 98.6);
        assert_eq!(format_line(&msg), "can_id=0x123  value=98.6");
    }

    #[test]
    fn test_parse_frame_id() {
        assert_eq!(parse_frame_id("0x100"), Ok(0x100));
        assert_eq!(parse_frame_id("7E8"), Ok(0x7E8));
        assert!(parse_frame_id("0xnope").is_err());
    }

    #[test]
    fn test_count_limit() {
        let options = TailOptions {
            shm_name: "/unused".into(),
            start: StartPosition::Latest,
            frame_id: None,
            count: Some(2),
            poll_interval: Duration::from_millis(1),
        };
        assert!(wants_more(&options, 1));
        assert!(!wants_more(&options, 2));
    }
}
