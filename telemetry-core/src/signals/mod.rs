//! Channel table and its DBC/JSON loaders
//!
//! This module contains the loaders for channel definition files and the
//! channel table they produce.

pub mod dbc;
pub mod json;
pub mod database;

// Re-export key types for convenience
pub use database::{ChannelDescriptor, ChannelTable, SignalType, TableStats};

use crate::types::{ConfigError, Result};
use std::path::Path;

/// Load a channel table, picking the loader from the file extension
pub fn load_channel_table(path: &Path) -> Result<ChannelTable> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());

    match extension.as_deref() {
        Some("dbc") => {
            log::debug!("Detected DBC channel table");
            dbc::parse_dbc_file(path)
        }
        Some("json") => {
            log::debug!("Detected JSON channel table");
            json::parse_json_file(path)
        }
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}
