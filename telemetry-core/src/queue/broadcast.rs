//! Lock-free single-writer broadcast ring
//!
//! One writer publishes into a fixed ring of `N` slots; any number of readers
//! each keep a private [`ConsumerCursor`] and drain at their own pace. The writer
//! never waits for readers: once a reader falls more than `N` items behind, the
//! oldest items are overwritten and reported to that reader as dropped.
//!
//! # Slot protocol
//!
//! Every slot carries a sequence stamp. For logical position `c`:
//!
//! ```text
//! writer                           reader (position r)
//! seq = 2c+1        (in progress)  s1 = seq (Acquire)      expect 2r+2
//! fence(Release)                   value = read
//! value = item                     fence(Acquire)
//! seq = 2c+2        (Release)      s2 = seq                s2 == s1
//! cursor = c+1      (Release)
//! ```
//!
//! A reader that sees any other stamp knows the slot was reused for a later
//! position and counts the item as dropped instead of delivering a torn or
//! out-of-order value.

use crossbeam_utils::CachePadded;
use std::alloc::{alloc_zeroed, handle_alloc_error, Layout};
use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicU64, Ordering};

use super::shmem::SharedMemorySafe;

#[repr(C)]
struct Slot<T> {
    seq: AtomicU64,
    value: UnsafeCell<T>,
}

/// Fixed-capacity broadcast ring, `N` must be a power of two
#[repr(C)]
pub struct BroadcastQueue<T, const N: usize> {
    write_cursor: CachePadded<AtomicU64>,
    slots: [Slot<T>; N],
}

// SAFETY: readers never hold a reference into a slot; values are copied out
// under the sequence check. Only one writer may exist (see `push`).
unsafe impl<T: Send, const N: usize> Sync for BroadcastQueue<T, N> {}

// SAFETY: repr(C), every field is valid as all-zero (cursor 0, stamps 0 mean
// "never written", T is SharedMemorySafe), and nothing is a pointer.
unsafe impl<T: SharedMemorySafe + Copy, const N: usize> SharedMemorySafe for BroadcastQueue<T, N> {}

struct CapacityCheck<const N: usize>;

impl<const N: usize> CapacityCheck<N> {
    const OK: () = assert!(
        N > 0 && N.is_power_of_two(),
        "Queue capacity must be a non-zero power of two"
    );
}

/// Where a new consumer starts reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartPosition {
    /// The current write position; only items pushed from now on are seen
    #[default]
    Latest,
    /// Position zero; replays whatever still survives in the ring
    Beginning,
}

/// One consumer's private read position
///
/// Lives in the consumer's own memory, never in the shared segment.
#[derive(Debug, Clone)]
pub struct ConsumerCursor {
    pos: u64,
    dropped_total: u64,
}

impl ConsumerCursor {
    /// Cursor at an explicit position
    pub fn at(pos: u64) -> Self {
        Self {
            pos,
            dropped_total: 0,
        }
    }

    /// Next logical position this consumer will read
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Items lost to overwrite over the cursor's lifetime
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }
}

/// Outcome of one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Items passed to the callback
    pub delivered: u64,
    /// Items overwritten before this consumer could read them
    pub dropped: u64,
}

impl DrainStats {
    /// Nothing new was available
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.dropped == 0
    }
}

impl<T: SharedMemorySafe + Copy, const N: usize> BroadcastQueue<T, N> {
    const MASK: u64 = N as u64 - 1;

    /// Allocate a zeroed queue on the heap (for in-process use)
    pub fn new_boxed() -> Box<Self> {
        let () = CapacityCheck::<N>::OK;

        let layout = Layout::new::<Self>();
        // SAFETY: the layout has non-zero size (a slot holds at least a stamp)
        // and all-zero bytes are a valid queue by the SharedMemorySafe contract.
        unsafe {
            let ptr = alloc_zeroed(layout) as *mut Self;
            if ptr.is_null() {
                handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        }
    }

    /// Number of slots
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Publish an item, overwriting the oldest slot when the ring is full
    ///
    /// Never blocks and never fails.
    ///
    /// # Safety
    ///
    /// The caller must be the only writer of this queue, in any process.
    #[inline]
    pub unsafe fn push(&self, item: T) {
        let () = CapacityCheck::<N>::OK;

        let cursor = self.write_cursor.load(Ordering::Relaxed);
        let slot = &self.slots[(cursor & Self::MASK) as usize];

        slot.seq.store(cursor * 2 + 1, Ordering::Relaxed);
        fence(Ordering::Release);
        // SAFETY: single writer; readers detect this overlapping write through
        // the stamp and discard what they read.
        unsafe { std::ptr::write_volatile(slot.value.get(), item) };
        slot.seq.store(cursor * 2 + 2, Ordering::Release);

        self.write_cursor.store(cursor + 1, Ordering::Release);
    }

    /// Current write position; everything before it has been published
    #[inline]
    pub fn current_pos(&self) -> u64 {
        self.write_cursor.load(Ordering::Acquire)
    }

    /// Create a consumer cursor for this queue
    pub fn cursor(&self, start: StartPosition) -> ConsumerCursor {
        match start {
            StartPosition::Latest => ConsumerCursor::at(self.current_pos()),
            StartPosition::Beginning => ConsumerCursor::at(0),
        }
    }

    /// Deliver every item published since `cursor`, oldest first
    ///
    /// A cursor more than `N` behind is first moved to the oldest item still in
    /// the ring. Items overwritten while this call is reading are skipped. Both
    /// are counted in [`DrainStats::dropped`]; nothing is delivered twice.
    pub fn consume<F>(&self, cursor: &mut ConsumerCursor, mut callback: F) -> DrainStats
    where
        F: FnMut(&T),
    {
        let latest = self.current_pos();
        let mut stats = DrainStats::default();

        // Writer restarted under an old cursor; resynchronize
        if cursor.pos > latest {
            cursor.pos = latest;
            return stats;
        }

        if latest - cursor.pos > N as u64 {
            let oldest = latest - N as u64;
            stats.dropped += oldest - cursor.pos;
            cursor.pos = oldest;
        }

        while cursor.pos < latest {
            match self.read_at(cursor.pos) {
                Some(value) => {
                    callback(&value);
                    stats.delivered += 1;
                }
                None => stats.dropped += 1,
            }
            cursor.pos += 1;
        }

        cursor.dropped_total += stats.dropped;
        stats
    }

    /// Copy out the item at `pos`, or `None` if its slot has been reused
    #[inline]
    fn read_at(&self, pos: u64) -> Option<T> {
        let slot = &self.slots[(pos & Self::MASK) as usize];
        let expected = pos * 2 + 2;

        let s1 = slot.seq.load(Ordering::Acquire);
        if s1 != expected {
            return None;
        }
        // SAFETY: T is Copy and valid for any bit pattern the writer stores; a
        // concurrent overwrite is caught by the second stamp check below.
        let value = unsafe { std::ptr::read_volatile(slot.value.get()) };
        fence(Ordering::Acquire);
        let s2 = slot.seq.load(Ordering::Relaxed);

        (s2 == s1).then_some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 8;

    fn drain(
        queue: &BroadcastQueue<u64, N>,
        cursor: &mut ConsumerCursor,
    ) -> (Vec<u64>, DrainStats) {
        let mut items = Vec::new();
        let stats = queue.consume(cursor, |v| items.push(*v));
        (items, stats)
    }

    #[test]
    fn test_order_preserved() {
        let queue = BroadcastQueue::<u64, N>::new_boxed();
        for v in 0..N as u64 {
            unsafe { queue.push(v) };
        }

        let mut cursor = queue.cursor(StartPosition::Beginning);
        let (items, stats) = drain(&queue, &mut cursor);
        assert_eq!(items, (0..N as u64).collect::<Vec<_>>());
        assert_eq!(stats, DrainStats { delivered: N as u64, dropped: 0 });
        assert_eq!(cursor.position(), N as u64);
    }

    #[test]
    fn test_overwrite_under_backpressure() {
        let queue = BroadcastQueue::<u64, N>::new_boxed();
        for v in 0..=N as u64 {
            unsafe { queue.push(v) };
        }

        let mut cursor = queue.cursor(StartPosition::Beginning);
        let (items, stats) = drain(&queue, &mut cursor);
        assert_eq!(items, (1..=N as u64).collect::<Vec<_>>());
        assert_eq!(stats.dropped, 1);
        assert_eq!(cursor.dropped_total(), 1);
    }

    #[test]
    fn test_far_behind_consumer_gets_last_window() {
        let queue = BroadcastQueue::<u64, N>::new_boxed();
        for v in 0..100u64 {
            unsafe { queue.push(v) };
        }

        let mut cursor = ConsumerCursor::at(0);
        let (items, stats) = drain(&queue, &mut cursor);
        assert_eq!(items, (92..100u64).collect::<Vec<_>>());
        assert_eq!(stats, DrainStats { delivered: 8, dropped: 92 });
    }

    #[test]
    fn test_new_consumer_skips_backlog() {
        let queue = BroadcastQueue::<u64, N>::new_boxed();
        for v in 0..5u64 {
            unsafe { queue.push(v) };
        }

        let mut cursor = queue.cursor(StartPosition::Latest);
        assert_eq!(cursor.position(), 5);
        let (items, stats) = drain(&queue, &mut cursor);
        assert!(items.is_empty());
        assert!(stats.is_empty());

        unsafe { queue.push(42) };
        let (items, _) = drain(&queue, &mut cursor);
        assert_eq!(items, vec![42]);
    }

    #[test]
    fn test_consumers_are_independent() {
        let queue = BroadcastQueue::<u64, N>::new_boxed();
        let mut fast = queue.cursor(StartPosition::Beginning);
        let mut slow = queue.cursor(StartPosition::Beginning);

        for v in 0..4u64 {
            unsafe { queue.push(v) };
        }
        assert_eq!(drain(&queue, &mut fast).0, vec![0, 1, 2, 3]);

        for v in 4..6u64 {
            unsafe { queue.push(v) };
        }
        assert_eq!(drain(&queue, &mut fast).0, vec![4, 5]);
        assert_eq!(drain(&queue, &mut slow).0, (0..6u64).collect::<Vec<_>>());
    }

    #[test]
    fn test_cursor_ahead_of_writer_resyncs() {
        let queue = BroadcastQueue::<u64, N>::new_boxed();
        unsafe { queue.push(1) };

        let mut cursor = ConsumerCursor::at(1000);
        assert!(drain(&queue, &mut cursor).1.is_empty());
        assert_eq!(cursor.position(), 1);

        unsafe { queue.push(2) };
        assert_eq!(drain(&queue, &mut cursor).0, vec![2]);
    }

    #[test]
    fn test_concurrent_reader_sees_no_duplicates_or_reordering() {
        const TOTAL: u64 = 200_000;
        let queue = BroadcastQueue::<u64, 64>::new_boxed();

        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut cursor = queue.cursor(StartPosition::Beginning);
                let mut last: Option<u64> = None;
                let mut delivered = 0u64;
                while cursor.position() < TOTAL {
                    let stats = queue.consume(&mut cursor, |v| {
                        if let Some(prev) = last {
                            assert!(*v > prev, "{} delivered after {}", v, prev);
                        }
                        last = Some(*v);
                    });
                    delivered += stats.delivered;
                }
                (delivered, cursor.dropped_total())
            });

            for v in 0..TOTAL {
                unsafe { queue.push(v) };
            }

            let (delivered, dropped) = reader.join().unwrap();
            assert_eq!(delivered + dropped, TOTAL);
        });
    }
}
