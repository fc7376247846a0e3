//! Channel table
//!
//! Maps each frame identifier to the ordered list of channels packed into its
//! payload. A table is built once by a loader and is read-only afterwards; a
//! reload builds a fresh table and swaps it in whole.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::types::{ConfigError, MAX_PAYLOAD};

/// Numeric interpretation of a channel's raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    /// IEEE-754 single precision
    Float,
    /// IEEE-754 double precision
    Double,
}

impl SignalType {
    /// Width of the type in bytes
    pub const fn width(self) -> usize {
        match self {
            SignalType::UInt8 | SignalType::Int8 => 1,
            SignalType::UInt16 | SignalType::Int16 => 2,
            SignalType::UInt32 | SignalType::Int32 | SignalType::Float => 4,
            SignalType::Double => 8,
        }
    }

    /// Type tag as used in JSON channel tables
    pub const fn as_str(self) -> &'static str {
        match self {
            SignalType::UInt8 => "uint8",
            SignalType::Int8 => "int8",
            SignalType::UInt16 => "uint16",
            SignalType::Int16 => "int16",
            SignalType::UInt32 => "uint32",
            SignalType::Int32 => "int32",
            SignalType::Float => "float",
            SignalType::Double => "double",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uint8" => Ok(SignalType::UInt8),
            "int8" => Ok(SignalType::Int8),
            "uint16" => Ok(SignalType::UInt16),
            "int16" => Ok(SignalType::Int16),
            "uint32" => Ok(SignalType::UInt32),
            "int32" => Ok(SignalType::Int32),
            "float" => Ok(SignalType::Float),
            "double" => Ok(SignalType::Double),
            other => Err(ConfigError::UnknownType(other.to_string())),
        }
    }
}

/// Layout and scaling of one channel within a frame payload
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDescriptor {
    /// Channel name (always present for DBC-derived channels)
    pub name: Option<String>,
    /// First payload byte of the channel
    pub start_byte: u8,
    /// Number of payload bytes the channel occupies
    pub length: u8,
    /// Numeric type of the raw bytes
    pub signal_type: SignalType,
    /// Scale factor to convert raw value to physical value
    pub scale: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    pub unit: Option<String>,
}

impl ChannelDescriptor {
    /// Create an unnamed descriptor whose length is the width of `signal_type`
    pub fn new(start_byte: u8, signal_type: SignalType, scale: f64, offset: f64) -> Self {
        Self {
            name: None,
            start_byte,
            length: signal_type.width() as u8,
            signal_type,
            scale,
            offset,
            unit: None,
        }
    }

    /// Builder method: set the channel name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder method: set the engineering unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// One past the last payload byte the channel reads
    pub fn end_byte(&self) -> usize {
        self.start_byte as usize + self.length as usize
    }

    /// Load-time check that the channel fits a classic payload and that its
    /// length agrees with its type
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !matches!(self.length, 1 | 2 | 4 | 8) {
            return Err(format!("length {} is not 1, 2, 4 or 8", self.length));
        }
        if self.length as usize != self.signal_type.width() {
            return Err(format!(
                "length {} does not match type {} ({} bytes)",
                self.length,
                self.signal_type,
                self.signal_type.width()
            ));
        }
        if self.end_byte() > MAX_PAYLOAD {
            return Err(format!(
                "bytes {}..{} exceed the {}-byte payload",
                self.start_byte,
                self.end_byte(),
                MAX_PAYLOAD
            ));
        }
        Ok(())
    }
}

/// The channel table
#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    /// Key: frame ID, Value: channels in reporting order
    frames: HashMap<u32, Vec<ChannelDescriptor>>,
}

impl ChannelTable {
    /// Create a new empty channel table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a channel to a frame, validating it first
    ///
    /// Used by the loaders while a table is being built.
    pub fn add_channel(
        &mut self,
        frame_id: u32,
        descriptor: ChannelDescriptor,
    ) -> std::result::Result<(), ConfigError> {
        let index = self.channels(frame_id).len();
        descriptor
            .validate()
            .map_err(|reason| ConfigError::InvalidDescriptor {
                frame_id,
                index,
                reason,
            })?;
        self.frames.entry(frame_id).or_default().push(descriptor);
        Ok(())
    }

    /// Register a frame with no channels yet (keeps declared-but-empty frames visible)
    pub(crate) fn declare_frame(&mut self, frame_id: u32) -> bool {
        if self.frames.contains_key(&frame_id) {
            return false;
        }
        self.frames.insert(frame_id, Vec::new());
        true
    }

    /// Channels of a frame, empty if the frame is unknown
    pub fn channels(&self, frame_id: u32) -> &[ChannelDescriptor] {
        self.frames.get(&frame_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, frame_id: u32) -> bool {
        self.frames.contains_key(&frame_id)
    }

    /// Find every channel with the given name
    pub fn find_channel(&self, name: &str) -> Vec<(u32, &ChannelDescriptor)> {
        let mut found: Vec<(u32, &ChannelDescriptor)> = self
            .frames
            .iter()
            .flat_map(|(id, channels)| channels.iter().map(move |c| (*id, c)))
            .filter(|(_, c)| c.name.as_deref() == Some(name))
            .collect();
        found.sort_by_key(|(id, _)| *id);
        found
    }

    /// Get all frame IDs in the table, sorted
    pub fn frame_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.frames.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Get table statistics
    pub fn stats(&self) -> TableStats {
        TableStats {
            num_frames: self.frames.len(),
            num_channels: self.frames.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Table statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// Number of frame IDs with a definition
    pub num_frames: usize,
    /// Total number of channels across all frames
    pub num_channels: usize,
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} frames, {} channels", self.num_frames, self.num_channels)
    }
}
