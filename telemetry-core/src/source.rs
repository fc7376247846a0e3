//! Frame sources
//!
//! The producer loop pulls frames through [`FrameSource`] so the bus socket can
//! be swapped for a canned sequence in tests and replays.

use std::collections::VecDeque;
use std::io;

use crate::types::CanFrame;

/// Something that yields CAN frames one at a time
pub trait FrameSource {
    /// Wait for the next frame
    ///
    /// `Ok(None)` means no frame arrived within the source's read timeout; the
    /// caller should check its control flags and call again.
    fn read_frame(&mut self) -> io::Result<Option<CanFrame>>;

    /// Human-readable name of the source for logs
    fn describe(&self) -> String;
}

/// Source that plays back a fixed list of frames, then reports end of stream
pub struct ReplaySource {
    frames: VecDeque<CanFrame>,
}

impl ReplaySource {
    pub fn new(frames: impl IntoIterator<Item = CanFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    /// Frames not yet read
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ReplaySource {
    fn read_frame(&mut self) -> io::Result<Option<CanFrame>> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "replay finished")),
        }
    }

    fn describe(&self) -> String {
        format!("replay ({} frames left)", self.frames.len())
    }
}
