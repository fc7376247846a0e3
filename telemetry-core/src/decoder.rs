//! Decoding engine
//!
//! [`decode`] turns a payload and a channel descriptor into a physical value.
//! [`Decoder`] owns the active channel table and fans one frame out into one
//! [`TelemetryMessage`] per channel.

use crate::signals::{ChannelDescriptor, ChannelTable, SignalType, TableStats};
use crate::types::{CanFrame, DecodeError, TelemetryMessage};
use byteorder::{ByteOrder, LittleEndian};

/// Decode one channel from a payload
///
/// Reads `descriptor.length` little-endian bytes at `descriptor.start_byte`,
/// interprets them as `descriptor.signal_type` and returns `raw * scale + offset`.
/// Channels that reach past the end of `payload` are rejected, never clamped.
pub fn decode(payload: &[u8], descriptor: &ChannelDescriptor) -> Result<f64, DecodeError> {
    let signal_type = descriptor.signal_type;
    if descriptor.length as usize != signal_type.width() {
        return Err(DecodeError::WidthMismatch {
            length: descriptor.length,
            signal_type,
        });
    }

    let start = descriptor.start_byte as usize;
    let end = descriptor.end_byte();
    let bytes = payload.get(start..end).ok_or(DecodeError::OutOfBounds {
        start,
        end,
        available: payload.len(),
    })?;

    let raw = match signal_type {
        SignalType::UInt8 => bytes[0] as f64,
        SignalType::Int8 => bytes[0] as i8 as f64,
        SignalType::UInt16 => LittleEndian::read_u16(bytes) as f64,
        SignalType::Int16 => LittleEndian::read_i16(bytes) as f64,
        SignalType::UInt32 => LittleEndian::read_u32(bytes) as f64,
        SignalType::Int32 => LittleEndian::read_i32(bytes) as f64,
        SignalType::Float => LittleEndian::read_f32(bytes) as f64,
        SignalType::Double => LittleEndian::read_f64(bytes),
    };

    Ok(raw * descriptor.scale + descriptor.offset)
}

/// Result of decoding one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    /// Channels decoded and emitted
    pub decoded: usize,
    /// Channels skipped because of a decode error
    pub skipped: usize,
}

/// Frame decoder - owns the active channel table
pub struct Decoder {
    table: ChannelTable,
}

impl Decoder {
    /// Create a decoder over a loaded table
    pub fn new(table: ChannelTable) -> Self {
        Self { table }
    }

    /// The table currently in use
    pub fn table(&self) -> &ChannelTable {
        &self.table
    }

    /// Get statistics about the active table
    pub fn table_stats(&self) -> TableStats {
        self.table.stats()
    }

    /// Swap in a freshly loaded table, returning the previous one
    ///
    /// The swap is whole: a frame is always decoded against exactly one table.
    pub fn replace_table(&mut self, table: ChannelTable) -> ChannelTable {
        log::info!("Channel table replaced: {} -> {}", self.table.stats(), table.stats());
        std::mem::replace(&mut self.table, table)
    }

    /// Decode every channel of `frame`, passing one message per channel to `emit`
    ///
    /// Messages are emitted in table order. A channel that fails to decode is
    /// logged and skipped; the remaining channels are still decoded.
    pub fn decode_frame<F>(&self, frame: &CanFrame, mut emit: F) -> FrameOutcome
    where
        F: FnMut(TelemetryMessage),
    {
        let channels = self.table.channels(frame.can_id);
        if channels.is_empty() {
            log::trace!("Unknown CAN ID: 0x{:X}, frame dropped", frame.can_id);
            return FrameOutcome::default();
        }

        let mut outcome = FrameOutcome::default();
        for (index, descriptor) in channels.iter().enumerate() {
            match decode(frame.payload(), descriptor) {
                Ok(value) => {
                    emit(TelemetryMessage::new(frame.can_id, frame.timestamp_ms, value));
                    outcome.decoded += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Skipping channel {} ({}) of frame 0x{:X}: {}",
                        index,
                        descriptor.name.as_deref().unwrap_or("unnamed"),
                        frame.can_id,
                        e
                    );
                    outcome.skipped += 1;
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_decode_uint16_scaled() {
        let descriptor = ChannelDescriptor::new(0, SignalType::UInt16, 0.1, 0.0);
        assert_close(decode(&[0x10, 0x00], &descriptor).unwrap(), 1.6);
    }

    #[test]
    fn test_decode_int16_with_offset() {
        let descriptor = ChannelDescriptor::new(0, SignalType::Int16, 0.01, -40.0);
        assert_close(decode(&[0xD8, 0xFF], &descriptor).unwrap(), -40.4);
    }

    #[test]
    fn test_decode_every_type() {
        let cases: &[(SignalType, &[u8], f64)] = &[
            (SignalType::UInt8, &[0xFF], 255.0),
            (SignalType::Int8, &[0xFF], -1.0),
            (SignalType::UInt16, &[0x34, 0x12], 4660.0),
            (SignalType::Int16, &[0x00, 0x80], -32768.0),
            (SignalType::UInt32, &[0x78, 0x56, 0x34, 0x12], 305_419_896.0),
            (SignalType::Int32, &[0xFE, 0xFF, 0xFF, 0xFF], -2.0),
            (SignalType::Float, &1.5f32.to_le_bytes(), 1.5),
            (SignalType::Double, &(-273.15f64).to_le_bytes(), -273.15),
        ];

        for (signal_type, bytes, expected) in cases {
            let descriptor = ChannelDescriptor::new(0, *signal_type, 1.0, 0.0);
            assert_close(decode(bytes, &descriptor).unwrap(), *expected);
        }
    }

    #[test]
    fn test_decode_at_offset() {
        let payload = [0x00, 0x00, 0x00, 0xE8, 0x03, 0x00, 0x00, 0x00];
        let descriptor = ChannelDescriptor::new(3, SignalType::UInt16, 1.0, 0.0);
        assert_close(decode(&payload, &descriptor).unwrap(), 1000.0);
    }

    #[test]
    fn test_reject_out_of_bounds() {
        let mut descriptor = ChannelDescriptor::new(6, SignalType::UInt32, 1.0, 0.0);
        assert_eq!(descriptor.length, 4);
        let err = decode(&[0u8; 8], &descriptor).unwrap_err();
        assert_eq!(
            err,
            DecodeError::OutOfBounds {
                start: 6,
                end: 10,
                available: 8
            }
        );

        // Shorter frame than the table expects
        descriptor.start_byte = 0;
        assert!(matches!(
            decode(&[0x01, 0x02], &descriptor),
            Err(DecodeError::OutOfBounds { available: 2, .. })
        ));
    }

    #[test]
    fn test_reject_width_mismatch() {
        let mut descriptor = ChannelDescriptor::new(0, SignalType::UInt32, 1.0, 0.0);
        descriptor.length = 2;
        assert!(matches!(
            decode(&[0u8; 8], &descriptor),
            Err(DecodeError::WidthMismatch { length: 2, .. })
        ));
    }

    #[test]
    fn test_decode_frame_emits_in_table_order_and_skips_failures() {
        let mut table = ChannelTable::new();
        table
            .add_channel(0x100, ChannelDescriptor::new(0, SignalType::UInt16, 0.1, 0.0))
            .unwrap();
        table
            .add_channel(0x100, ChannelDescriptor::new(4, SignalType::UInt32, 1.0, 0.0))
            .unwrap();
        table
            .add_channel(0x100, ChannelDescriptor::new(2, SignalType::Int8, 1.0, 0.0))
            .unwrap();
        let decoder = Decoder::new(table);

        // 4-byte frame: the uint32 at byte 4 does not fit
        let frame = CanFrame::new(0x100, 1234, &[0x10, 0x00, 0xFE, 0x00]);
        let mut messages = Vec::new();
        let outcome = decoder.decode_frame(&frame, |m| messages.push(m));

        assert_eq!(outcome, FrameOutcome { decoded: 2, skipped: 1 });
        assert_eq!(messages.len(), 2);
        assert_close(messages[0].value, 1.6);
        assert_close(messages[1].value, -2.0);
        assert!(messages.iter().all(|m| m.frame_id == 0x100 && m.timestamp_ms == 1234));
    }

    #[test]
    fn test_unknown_frame_emits_nothing() {
        let decoder = Decoder::new(ChannelTable::new());
        let frame = CanFrame::new(0x7FF, 0, &[0u8; 8]);
        let outcome = decoder.decode_frame(&frame, |_| panic!("no channels expected"));
        assert_eq!(outcome, FrameOutcome::default());
    }

    #[test]
    fn test_replace_table() {
        let mut decoder = Decoder::new(ChannelTable::new());
        let mut table = ChannelTable::new();
        table
            .add_channel(0x1, ChannelDescriptor::new(0, SignalType::UInt8, 1.0, 0.0))
            .unwrap();

        let old = decoder.replace_table(table);
        assert!(old.is_empty());
        assert_eq!(decoder.table_stats().num_channels, 1);
    }
}
