//! Shared memory broadcast queue
//!
//! - [`broadcast`] - the ring algorithm, usable on the heap or in shared memory
//! - [`shmem`] - POSIX segment mapping with creator/opener roles
//! - [`ipc`] - publisher and subscriber endpoints over a named segment

pub mod broadcast;
pub mod ipc;
pub mod shmem;

pub use broadcast::{BroadcastQueue, ConsumerCursor, DrainStats, StartPosition};
pub use ipc::{
    Publisher, Subscriber, TelemetryPublisher, TelemetrySubscriber, DEFAULT_SHM_NAME,
    QUEUE_CAPACITY,
};
pub use shmem::{SharedMemorySafe, ShmError};
