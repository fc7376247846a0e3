//! Core types for the telemetry pipeline
//!
//! This module defines the frames the producer reads off the bus, the messages it
//! publishes into the broadcast queue, and the error kinds shared by the channel
//! loaders and the decoding engine.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

use crate::signals::SignalType;

/// Payload size of a classic CAN frame
pub const MAX_PAYLOAD: usize = 8;

/// Timestamp type used for human-readable output
pub type Timestamp = DateTime<Utc>;

/// Result type for channel table loading
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Raw CAN frame as read from the bus interface
///
/// The payload is stored inline; only the first `len` bytes are meaningful.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanFrame {
    /// Receipt time in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// CAN message ID (11-bit or 29-bit)
    pub can_id: u32,
    /// Payload bytes (classic CAN, zero padded past `len`)
    pub data: [u8; MAX_PAYLOAD],
    /// Number of valid payload bytes (DLC)
    pub len: u8,
}

impl CanFrame {
    /// Build a frame from a payload slice, truncating anything past 8 bytes
    pub fn new(can_id: u32, timestamp_ms: u64, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_PAYLOAD);
        let mut data = [0u8; MAX_PAYLOAD];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            timestamp_ms,
            can_id,
            data,
            len: len as u8,
        }
    }

    /// The bytes actually received
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.len as usize
    }
}

/// One decoded channel value, published to every consumer
///
/// `repr(C)` with explicit padding so the layout is identical in every process
/// mapping the queue.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryMessage {
    /// Frame identifier the value was decoded from
    pub frame_id: u32,
    _reserved: u32,
    /// Frame receipt time in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Physical value (raw * scale + offset)
    pub value: f64,
}

impl TelemetryMessage {
    pub fn new(frame_id: u32, timestamp_ms: u64, value: f64) -> Self {
        Self {
            frame_id,
            _reserved: 0,
            timestamp_ms,
            value,
        }
    }

    /// Convert the receipt time to DateTime<Utc>
    pub fn timestamp(&self) -> Timestamp {
        millis_to_timestamp(self.timestamp_ms as i64)
    }
}

impl fmt::Display for TelemetryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "can_id=0x{:03X}  value={}", self.frame_id, self.value)
    }
}

/// Convert milliseconds since epoch to a timestamp, falling back to now
pub fn millis_to_timestamp(ms: i64) -> Timestamp {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Errors raised while loading a channel table
///
/// These are fatal at startup; the owning process exits before entering its loop.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON channel table {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported channel table format: {0:?} (expected .dbc or .json)")]
    UnsupportedFormat(PathBuf),

    #[error("Invalid frame id: {0:?}")]
    InvalidFrameId(String),

    #[error("Frame id 0x{0:X} is defined more than once")]
    DuplicateFrameId(u32),

    #[error("Unknown signal type: {0:?}")]
    UnknownType(String),

    #[error("Invalid channel {index} of frame 0x{frame_id:X}: {reason}")]
    InvalidDescriptor {
        frame_id: u32,
        index: usize,
        reason: String,
    },

    #[error("DBC line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    #[error("DBC line {line}: signal '{signal}' is big-endian, only little-endian (@1) is supported")]
    UnsupportedByteOrder { line: usize, signal: String },

    #[error("DBC line {line}: unsupported signal width {bits} bits for '{signal}'")]
    UnsupportedWidth {
        line: usize,
        signal: String,
        bits: u32,
    },

    #[error("DBC line {line}: signal '{signal}' ({start_bit}|{bit_length}) is not byte aligned, sub-byte packing is not supported")]
    Unaligned {
        line: usize,
        signal: String,
        start_bit: u32,
        bit_length: u32,
    },
}

/// Errors for a single (frame, channel) pair
///
/// Non-fatal: the pair is skipped and decoding of the frame continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("channel needs bytes {start}..{end} but the payload has {available}")]
    OutOfBounds {
        start: usize,
        end: usize,
        available: usize,
    },

    #[error(
        "channel declares {length} bytes but {signal_type} is {} bytes wide",
        .signal_type.width()
    )]
    WidthMismatch { length: u8, signal_type: SignalType },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_truncates_long_payload() {
        let frame = CanFrame::new(0x100, 0, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(frame.dlc(), 8);
        assert_eq!(frame.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);

        let short = CanFrame::new(0x100, 0, &[0xAA, 0xBB]);
        assert_eq!(short.payload(), &[0xAA, 0xBB]);
        assert_eq!(short.data[2..], [0u8; 6]);
    }

    #[test]
    fn test_message_layout() {
        assert_eq!(std::mem::size_of::<TelemetryMessage>(), 24);
        assert_eq!(std::mem::align_of::<TelemetryMessage>(), 8);
    }

    #[test]
    fn test_message_display() {
        let msg = TelemetryMessage::new(0x123, 0, 98.6);
        assert_eq!(format!("{}", msg), "can_id=0x123  value=98.6");
    }
}
