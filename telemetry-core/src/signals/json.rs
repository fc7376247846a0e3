//! JSON channel table loader
//!
//! ```json
//! {
//!   "0x100": {
//!     "signals": [
//!       { "start_byte": 0, "length": 2, "type": "uint16", "scale": 0.1, "offset": 0 }
//!     ]
//!   }
//! }
//! ```

use crate::signals::database::{ChannelDescriptor, ChannelTable, SignalType};
use crate::types::{ConfigError, Result};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// Top-level object in document order, repeated keys kept
struct FrameEntries(Vec<(String, FrameEntry)>);

impl<'de> Deserialize<'de> for FrameEntries {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = FrameEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object keyed by frame id")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<FrameEntries, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, FrameEntry>()? {
                    entries.push(entry);
                }
                Ok(FrameEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[derive(Debug, Deserialize)]
struct FrameEntry {
    #[serde(default)]
    signals: Vec<SignalEntry>,
}

#[derive(Debug, Deserialize)]
struct SignalEntry {
    #[serde(default)]
    name: Option<String>,
    start_byte: u8,
    length: u8,
    #[serde(rename = "type")]
    signal_type: String,
    #[serde(default = "default_scale")]
    scale: f64,
    #[serde(default)]
    offset: f64,
    #[serde(default)]
    unit: Option<String>,
}

fn default_scale() -> f64 {
    1.0
}

/// Load a JSON channel table from disk
pub fn parse_json_file(path: &Path) -> Result<ChannelTable> {
    log::info!("Parsing JSON channel table: {:?}", path);

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let frames: FrameEntries =
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    let table = build_table(frames)?;
    log::info!("Parsed {} from {:?}", table.stats(), path);
    Ok(table)
}

/// Parse JSON text into a channel table
pub fn parse_json_str(content: &str) -> Result<ChannelTable> {
    let frames: FrameEntries =
        serde_json::from_str(content).map_err(|source| ConfigError::Json {
            path: "<inline>".into(),
            source,
        })?;
    build_table(frames)
}

fn build_table(FrameEntries(frames): FrameEntries) -> Result<ChannelTable> {
    let mut table = ChannelTable::new();

    for (key, entry) in frames {
        let frame_id = parse_frame_id(&key)?;
        if !table.declare_frame(frame_id) {
            return Err(ConfigError::DuplicateFrameId(frame_id));
        }

        for signal in entry.signals {
            let signal_type: SignalType = signal.signal_type.parse()?;
            let descriptor = ChannelDescriptor {
                name: signal.name,
                start_byte: signal.start_byte,
                length: signal.length,
                signal_type,
                scale: signal.scale,
                offset: signal.offset,
                unit: signal.unit,
            };
            table.add_channel(frame_id, descriptor)?;
        }
    }

    Ok(table)
}

/// Frame ids are hexadecimal strings, with or without a `0x` prefix
fn parse_frame_id(key: &str) -> Result<u32> {
    let trimmed = key.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u32::from_str_radix(digits, 16).map_err(|_| ConfigError::InvalidFrameId(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_json_table() {
        let json = r#"{
            "0x100": { "signals": [
                { "start_byte": 0, "length": 2, "type": "uint16", "scale": 0.1, "offset": 0 },
                { "name": "temp", "start_byte": 2, "length": 2, "type": "int16",
                  "scale": 0.01, "offset": -40, "unit": "C" }
            ]},
            "0x2A0": { "signals": [
                { "start_byte": 0, "length": 8, "type": "double", "scale": 1.0, "offset": 0.0 }
            ]}
        }"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(json.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let table = parse_json_file(temp_file.path()).unwrap();
        assert_eq!(table.frame_ids(), vec![0x100, 0x2A0]);

        let channels = table.channels(0x100);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].signal_type, SignalType::UInt16);
        assert_eq!(channels[0].name, None);
        assert_eq!(channels[1].name.as_deref(), Some("temp"));
        assert_eq!(channels[1].offset, -40.0);
        assert_eq!(table.channels(0x2A0)[0].signal_type, SignalType::Double);
    }

    #[test]
    fn test_unknown_type_is_fatal() {
        let json = r#"{ "0x100": { "signals": [
            { "start_byte": 0, "length": 2, "type": "uint24", "scale": 1, "offset": 0 }
        ]}}"#;
        assert!(matches!(
            parse_json_str(json),
            Err(ConfigError::UnknownType(t)) if t == "uint24"
        ));
    }

    #[test]
    fn test_invalid_descriptor_is_fatal() {
        let json = r#"{ "0x100": { "signals": [
            { "start_byte": 6, "length": 4, "type": "uint32", "scale": 1, "offset": 0 }
        ]}}"#;
        assert!(matches!(
            parse_json_str(json),
            Err(ConfigError::InvalidDescriptor { frame_id: 0x100, .. })
        ));
    }

    #[test]
    fn test_duplicate_frame_ids() {
        let json = r#"{ "0x100": { "signals": [] }, "0x0100": { "signals": [] } }"#;
        assert!(matches!(
            parse_json_str(json),
            Err(ConfigError::DuplicateFrameId(0x100))
        ));
    }

    #[test]
    fn test_repeated_key_is_rejected() {
        let json = r#"{
            "0x100": { "signals": [
                { "start_byte": 0, "length": 1, "type": "uint8", "scale": 1, "offset": 0 }
            ]},
            "0x100": { "signals": [] }
        }"#;
        assert!(matches!(
            parse_json_str(json),
            Err(ConfigError::DuplicateFrameId(0x100))
        ));
    }

    #[test]
    fn test_top_level_must_be_object() {
        assert!(matches!(
            parse_json_str("[1, 2]"),
            Err(ConfigError::Json { .. })
        ));
    }

    #[test]
    fn test_frame_id_forms() {
        assert_eq!(parse_frame_id("0x100").unwrap(), 0x100);
        assert_eq!(parse_frame_id("0X7e8").unwrap(), 0x7E8);
        assert_eq!(parse_frame_id("1FF").unwrap(), 0x1FF);
        assert!(matches!(
            parse_frame_id("0xZZ"),
            Err(ConfigError::InvalidFrameId(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = parse_json_file(Path::new("/nonexistent/channels.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
