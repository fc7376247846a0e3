//! Vehicle Telemetry Core Library
//!
//! Building blocks for a real-time telemetry pipeline on one machine: a bus
//! reader decodes raw CAN frames into physical values and publishes them through
//! a lock-free shared memory ring, and any number of independent processes drain
//! that ring at their own pace.
//!
//! # Architecture
//!
//! - [`signals`] loads the channel table from DBC or JSON files
//! - [`decoder`] turns (payload, descriptor) into a scaled value
//! - [`queue`] is the single-writer broadcast ring in POSIX shared memory
//! - [`recorder`] writes and reads the fixed-layout binary session log
//! - [`source`] abstracts where frames come from
//!
//! The library does NOT open bus sockets, parse process configuration, or handle
//! signals; that is the job of the application layer (telemetry-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use telemetry_core::{load_channel_table, CanFrame, Decoder, StartPosition};
//! use telemetry_core::{TelemetryPublisher, TelemetrySubscriber};
//! use std::path::Path;
//!
//! let table = load_channel_table(Path::new("channels.dbc")).unwrap();
//! let decoder = Decoder::new(table);
//!
//! // Producer process
//! let publisher = TelemetryPublisher::create("/vehicle_telemetry", true).unwrap();
//! let frame = CanFrame::new(0x100, 0, &[0x10, 0x00]);
//! decoder.decode_frame(&frame, |msg| publisher.push(msg));
//!
//! // Consumer process
//! let mut subscriber =
//!     TelemetrySubscriber::open("/vehicle_telemetry", StartPosition::Latest).unwrap();
//! let stats = subscriber.drain(|msg| println!("{}", msg));
//! if stats.dropped > 0 {
//!     eprintln!("fell behind, lost {} messages", stats.dropped);
//! }
//! ```

// Public modules
pub mod decoder;
pub mod queue;
pub mod recorder;
pub mod signals;
pub mod source;
pub mod types;

// Re-export main types for convenience
pub use decoder::{decode, Decoder, FrameOutcome};
pub use queue::{
    BroadcastQueue, ConsumerCursor, DrainStats, ShmError, StartPosition, TelemetryPublisher,
    TelemetrySubscriber, DEFAULT_SHM_NAME, QUEUE_CAPACITY,
};
pub use recorder::{LogEntry, LogError, LogReader, LogWriter};
pub use signals::{load_channel_table, ChannelDescriptor, ChannelTable, SignalType, TableStats};
pub use source::{FrameSource, ReplaySource};
pub use types::{CanFrame, ConfigError, DecodeError, TelemetryMessage, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
