//! Subcommand implementations

pub mod channels;
pub mod dump;
pub mod logger;
pub mod reader;
pub mod tail;
