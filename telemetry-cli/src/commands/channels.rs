//! Print a channel table

use anyhow::{Context, Result};
use std::path::Path;
use telemetry_core::{load_channel_table, ChannelDescriptor, ChannelTable};

pub fn run(path: &Path) -> Result<()> {
    let table = load_channel_table(path).with_context(|| format!("Failed to load {:?}", path))?;
    print!("{}", render(&table));
    println!("{}", table.stats());
    Ok(())
}

pub fn render(table: &ChannelTable) -> String {
    let mut out = String::new();
    for frame_id in table.frame_ids() {
        out.push_str(&format!("0x{:03X}\n", frame_id));
        for (index, channel) in table.channels(frame_id).iter().enumerate() {
            out.push_str(&format!("  [{}] {}\n", index, describe(channel)));
        }
    }
    out
}

fn describe(channel: &ChannelDescriptor) -> String {
    let mut line = format!(
        "{:<16} bytes {}..{}  {:<6}  scale={} offset={}",
        channel.name.as_deref().unwrap_or("-"),
        channel.start_byte,
        channel.end_byte(),
        channel.signal_type,
        channel.scale,
        channel.offset
    );
    if let Some(unit) = channel.unit.as_deref().filter(|u| !u.is_empty()) {
        line.push_str(&format!(" [{}]", unit));
    }
    line
}
