//! DBC file parser
//!
//! Translates the message and signal lines of a Vector DBC file into a
//! [`ChannelTable`]. Only byte-aligned little-endian signals of 8, 16, 32 or 64
//! bits are supported; everything else in the file (nodes, comments,
//! attributes, value tables) is skipped.
//!
//! Parsing is a two-state machine over classified lines:
//!
//! ```text
//!            BO_ line                      SG_ line (indented)
//!  Outside ────────────> InMessage(id) ──────────┐
//!     ^                     │   ^                │ add channel to id
//!     │ non-indented,       │   └────────────────┘
//!     │ non-blank, not BO_  │
//!     └─────────────────────┘   (a new BO_ line re-enters InMessage)
//! ```
//!
//! Each message id may be defined by one `BO_` block only.

use crate::signals::database::{ChannelDescriptor, ChannelTable, SignalType};
use crate::types::{ConfigError, Result};
use std::path::Path;

/// Bit 31 of a DBC message id marks an extended (29-bit) identifier
const EXTENDED_ID_FLAG: u32 = 0x8000_0000;

/// Parse a DBC file into a channel table
pub fn parse_dbc_file(path: &Path) -> Result<ChannelTable> {
    log::info!("Parsing DBC file: {:?}", path);

    let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    // Try UTF-8 first, then fallback to Latin-1/Windows-1252 encoding
    let content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(err) => {
            log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
            err.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let table = parse_dbc_str(&content)?;
    log::info!("Parsed {} from {:?}", table.stats(), path);
    Ok(table)
}

/// Parse DBC text into a channel table
pub fn parse_dbc_str(content: &str) -> Result<ChannelTable> {
    let mut table = ChannelTable::new();
    let mut state = State::Outside;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;

        state = match (classify(raw), state) {
            (Line::Message(body), _) => {
                let message = parse_message(body, line_no)?;
                log::debug!(
                    "Message {} (ID 0x{:X}, DLC {})",
                    message.name,
                    message.id,
                    message.dlc
                );
                if !table.declare_frame(message.id) {
                    return Err(ConfigError::DuplicateFrameId(message.id));
                }
                State::InMessage(message.id)
            }
            (Line::Signal(body), State::InMessage(frame_id)) => {
                match parse_signal(body, line_no)? {
                    SignalLine::Plain(descriptor) => table.add_channel(frame_id, descriptor)?,
                    SignalLine::Multiplexed(name) => {
                        log::warn!(
                            "Line {}: skipping multiplexed signal '{}', multiplexing is not supported",
                            line_no,
                            name
                        );
                    }
                }
                State::InMessage(frame_id)
            }
            (Line::Signal(_), State::Outside) => {
                log::warn!("Line {}: SG_ outside of a message, ignored", line_no);
                State::Outside
            }
            (Line::Blank | Line::Indented, state) => state,
            (Line::Other, _) => State::Outside,
        };
    }

    Ok(table)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    InMessage(u32),
}

/// A line of DBC text, classified by its leading characters
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Blank,
    /// `BO_ ...`, body after the keyword
    Message(&'a str),
    /// Indented `SG_ ...`, body after the keyword
    Signal(&'a str),
    /// Any other indented line
    Indented,
    /// Any other non-indented line
    Other,
}

fn classify(line: &str) -> Line<'_> {
    if line.trim().is_empty() {
        return Line::Blank;
    }

    if line.starts_with([' ', '\t']) {
        return match keyword_body(line.trim_start(), "SG_") {
            Some(body) => Line::Signal(body),
            None => Line::Indented,
        };
    }

    match keyword_body(line, "BO_") {
        Some(body) => Line::Message(body),
        None => Line::Other,
    }
}

/// Strip `keyword` when it is followed by whitespace (so `BO_TX_BU_` is not `BO_`)
fn keyword_body<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    rest.starts_with([' ', '\t']).then_some(rest)
}

#[derive(Debug)]
struct MessageLine<'a> {
    id: u32,
    name: &'a str,
    dlc: u8,
}

/// `<id> <name>: <dlc> <sender>`
fn parse_message(body: &str, line: usize) -> Result<MessageLine<'_>> {
    let syntax = |reason: &str| ConfigError::Syntax {
        line,
        reason: reason.to_string(),
    };

    let (head, tail) = body
        .split_once(':')
        .ok_or_else(|| syntax("expected 'BO_ <id> <name>: <dlc> <sender>'"))?;

    let mut head = head.split_whitespace();
    let id = head
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| syntax("message id is not a number"))?;
    let name = head.next().ok_or_else(|| syntax("missing message name"))?;

    let dlc = tail
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<u8>().ok())
        .ok_or_else(|| syntax("message length is not a number"))?;

    Ok(MessageLine {
        id: id & !EXTENDED_ID_FLAG,
        name,
        dlc,
    })
}

#[derive(Debug)]
enum SignalLine {
    Plain(ChannelDescriptor),
    Multiplexed(String),
}

/// `<name> : <start>|<len>@<order><sign> (<scale>,<offset>) [<min>|<max>] "<unit>" <receivers>`
fn parse_signal(body: &str, line: usize) -> Result<SignalLine> {
    let syntax = |reason: &str| ConfigError::Syntax {
        line,
        reason: reason.to_string(),
    };

    let (head, tail) = body.split_once(':').ok_or_else(|| {
        syntax("expected 'SG_ <name> : <start>|<length>@<order><sign> (<scale>,<offset>)'")
    })?;

    let mut head = head.split_whitespace();
    let name = head.next().ok_or_else(|| syntax("missing signal name"))?;
    if head.next().is_some() {
        return Ok(SignalLine::Multiplexed(name.to_string()));
    }

    let open = tail.find('(').ok_or_else(|| syntax("missing '(<scale>,<offset>)'"))?;
    let close = tail[open..]
        .find(')')
        .map(|i| open + i)
        .ok_or_else(|| syntax("unterminated '(<scale>,<offset>)'"))?;

    // <start>|<len>@<order><sign>
    let layout = tail[..open].trim();
    let (start, rest) = layout
        .split_once('|')
        .ok_or_else(|| syntax("expected '<start>|<length>@<order><sign>'"))?;
    let (length, marker) = rest
        .split_once('@')
        .ok_or_else(|| syntax("expected '@<order><sign>' after the bit length"))?;
    let start_bit: u32 = start
        .trim()
        .parse()
        .map_err(|_| syntax("start bit is not a number"))?;
    let bit_length: u32 = length
        .trim()
        .parse()
        .map_err(|_| syntax("bit length is not a number"))?;

    let mut marker = marker.chars();
    match marker.next() {
        Some('1') => {}
        Some('0') => {
            return Err(ConfigError::UnsupportedByteOrder {
                line,
                signal: name.to_string(),
            })
        }
        _ => return Err(syntax("byte order must be 0 or 1")),
    }
    let is_signed = match marker.next() {
        Some('+') => false,
        Some('-') => true,
        _ => return Err(syntax("sign must be '+' or '-'")),
    };

    // (<scale>,<offset>)
    let (scale, offset) = tail[open + 1..close]
        .split_once(',')
        .ok_or_else(|| syntax("expected '(<scale>,<offset>)'"))?;
    let scale: f64 = scale.trim().parse().map_err(|_| syntax("scale is not a number"))?;
    let offset: f64 = offset.trim().parse().map_err(|_| syntax("offset is not a number"))?;

    if start_bit % 8 != 0 || bit_length % 8 != 0 {
        return Err(ConfigError::Unaligned {
            line,
            signal: name.to_string(),
            start_bit,
            bit_length,
        });
    }
    let signal_type = derive_signal_type(bit_length, is_signed).ok_or_else(|| {
        ConfigError::UnsupportedWidth {
            line,
            signal: name.to_string(),
            bits: bit_length,
        }
    })?;
    let start_byte = u8::try_from(start_bit / 8).map_err(|_| syntax("start bit out of range"))?;

    let mut descriptor =
        ChannelDescriptor::new(start_byte, signal_type, scale, offset).with_name(name);
    if let Some(unit) = parse_unit(&tail[close + 1..]) {
        descriptor = descriptor.with_unit(unit);
    }
    Ok(SignalLine::Plain(descriptor))
}

/// Derive the numeric type from bit length and signedness
fn derive_signal_type(bit_length: u32, is_signed: bool) -> Option<SignalType> {
    match (bit_length, is_signed) {
        (8, false) => Some(SignalType::UInt8),
        (8, true) => Some(SignalType::Int8),
        (16, false) => Some(SignalType::UInt16),
        (16, true) => Some(SignalType::Int16),
        (32, false) => Some(SignalType::UInt32),
        (32, true) => Some(SignalType::Int32),
        (64, _) => Some(SignalType::Double),
        _ => None,
    }
}

/// The quoted unit after the scale/offset group, if non-empty
fn parse_unit(rest: &str) -> Option<String> {
    let (_, quoted) = rest.split_once('"')?;
    let (unit, _) = quoted.split_once('"')?;
    (!unit.is_empty()).then(|| unit.to_string())
}
