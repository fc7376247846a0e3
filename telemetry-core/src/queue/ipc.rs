//! Broadcast queue endpoints over a named shared memory segment
//!
//! ```text
//! +----------------------------------------+
//! | Header  magic, capacity, slot size     |
//! +----------------------------------------+
//! | write cursor     (cache padded)        |
//! +----------------------------------------+
//! | slots: [seq stamp | value; N]          |
//! +----------------------------------------+
//! ```
//!
//! The [`Publisher`] owns the segment: it creates it, may push, and unlinks it on
//! drop. A [`Subscriber`] only attaches, keeps its cursor locally and drains.

use std::cell::Cell;
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::broadcast::{BroadcastQueue, ConsumerCursor, DrainStats, StartPosition};
use super::shmem::{self, Creator, Opener, SharedMemorySafe, Shm, ShmError};
use crate::types::TelemetryMessage;

/// Default segment name
pub const DEFAULT_SHM_NAME: &str = "/vehicle_telemetry";

/// Slots in the telemetry queue
pub const QUEUE_CAPACITY: usize = 4096;

/// Publisher of decoded telemetry
pub type TelemetryPublisher = Publisher<TelemetryMessage, QUEUE_CAPACITY>;

/// Subscriber to decoded telemetry
pub type TelemetrySubscriber = Subscriber<TelemetryMessage, QUEUE_CAPACITY>;

const INIT_MAGIC: u64 = 0x544C_4D51_494E_4954; // "TLMQINIT" in ASCII
const INIT_TIMEOUT: Duration = Duration::from_secs(1);
const INIT_POLL: Duration = Duration::from_millis(1);

// SAFETY: repr(C) plain data; all-zero is a valid message.
unsafe impl SharedMemorySafe for TelemetryMessage {}

#[repr(C)]
#[repr(align(64))]
struct Header {
    magic: AtomicU64,
    capacity: AtomicU64,
    slot_size: AtomicU64,
}

#[repr(C)]
struct Segment<T, const N: usize> {
    header: Header,
    queue: BroadcastQueue<T, N>,
}

// SAFETY: repr(C) and every field is SharedMemorySafe.
unsafe impl<T: SharedMemorySafe + Copy, const N: usize> SharedMemorySafe for Segment<T, N> {}

impl<T: SharedMemorySafe + Copy, const N: usize> Segment<T, N> {
    /// Publish the layout, then the magic that lets openers in
    fn mark_initialized(&self) {
        self.header.capacity.store(N as u64, Ordering::Relaxed);
        self.header
            .slot_size
            .store(size_of::<T>() as u64, Ordering::Relaxed);
        self.header.magic.store(INIT_MAGIC, Ordering::Release);
    }

    fn wait_for_init(&self, deadline: Instant) -> bool {
        loop {
            if self.header.magic.load(Ordering::Acquire) == INIT_MAGIC {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(INIT_POLL);
        }
    }

    fn check_layout(&self, path: &str) -> Result<(), ShmError> {
        let capacity = self.header.capacity.load(Ordering::Relaxed);
        let slot_size = self.header.slot_size.load(Ordering::Relaxed);
        if capacity != N as u64 {
            return Err(ShmError::LayoutMismatch {
                path: path.to_string(),
                reason: format!("capacity {} but expected {}", capacity, N),
            });
        }
        if slot_size != size_of::<T>() as u64 {
            return Err(ShmError::LayoutMismatch {
                path: path.to_string(),
                reason: format!("slot size {} but expected {}", slot_size, size_of::<T>()),
            });
        }
        Ok(())
    }
}

type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// The single writer of a segment
///
/// Not `Sync`: pushes must come from one thread.
pub struct Publisher<T: SharedMemorySafe + Copy, const N: usize> {
    shm: Shm<Segment<T, N>, Creator>,
    _unsync: PhantomUnsync,
}

impl<T: SharedMemorySafe + Copy, const N: usize> Publisher<T, N> {
    /// Create the segment and become its writer
    ///
    /// With `reclaim_stale`, a name left behind by a previous owner is unlinked
    /// first; otherwise an existing name is an error.
    pub fn create(path: &str, reclaim_stale: bool) -> Result<Self, ShmError> {
        if reclaim_stale && shmem::unlink_stale(path)? {
            log::warn!("Removed stale shared memory segment {}", path);
        }

        let shm = Shm::<Segment<T, N>, Creator>::create(path)?;
        shm.mark_initialized();
        log::info!(
            "Broadcast queue {} ready: {} slots of {} bytes",
            path,
            N,
            size_of::<T>()
        );

        Ok(Self {
            shm,
            _unsync: PhantomData,
        })
    }

    /// Publish one item to every subscriber
    #[inline]
    pub fn push(&self, item: T) {
        // SAFETY: the segment was created exclusively by this publisher, which
        // is neither Clone nor Sync, so it is the only writer.
        unsafe { self.shm.queue.push(item) }
    }

    pub fn current_pos(&self) -> u64 {
        self.shm.queue.current_pos()
    }

    pub fn path(&self) -> &str {
        self.shm.path()
    }
}

/// An attached reader with its own cursor
pub struct Subscriber<T: SharedMemorySafe + Copy, const N: usize> {
    shm: Shm<Segment<T, N>, Opener>,
    cursor: ConsumerCursor,
}

impl<T: SharedMemorySafe + Copy, const N: usize> Subscriber<T, N> {
    /// Attach to an existing segment
    ///
    /// Waits up to one second for the owner to finish initializing it, then
    /// rejects a segment built for a different capacity or item size.
    pub fn open(path: &str, start: StartPosition) -> Result<Self, ShmError> {
        let deadline = Instant::now() + INIT_TIMEOUT;
        let shm = loop {
            match Shm::<Segment<T, N>, Opener>::open(path) {
                // Owner has created the name but not sized it yet
                Err(ShmError::SizeMismatch { actual: 0, .. }) => {
                    if Instant::now() >= deadline {
                        return Err(init_timeout(path));
                    }
                    std::thread::sleep(INIT_POLL);
                }
                result => break result?,
            }
        };
        if !shm.wait_for_init(deadline) {
            return Err(init_timeout(path));
        }
        shm.check_layout(path)?;

        let cursor = shm.queue.cursor(start);
        log::info!(
            "Attached to {} at position {} ({:?})",
            path,
            cursor.position(),
            start
        );
        Ok(Self { shm, cursor })
    }

    /// Deliver everything published since the last drain
    pub fn drain<F>(&mut self, callback: F) -> DrainStats
    where
        F: FnMut(&T),
    {
        self.shm.queue.consume(&mut self.cursor, callback)
    }

    pub fn cursor(&self) -> &ConsumerCursor {
        &self.cursor
    }

    /// Producer's current write position
    pub fn current_pos(&self) -> u64 {
        self.shm.queue.current_pos()
    }

    pub fn path(&self) -> &str {
        self.shm.path()
    }
}

fn init_timeout(path: &str) -> ShmError {
    ShmError::InitTimeout {
        path: path.to_string(),
        waited_ms: INIT_TIMEOUT.as_millis() as u64,
    }
}
