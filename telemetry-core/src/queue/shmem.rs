//! POSIX shared memory segments
//!
//! [`Shm<T, Mode>`] maps a named shared memory object as a `T`. The mode marker
//! decides who tears the name down:
//!
//! ```text
//! Creator          Opener
//!    |                |
//!   Drop            Drop
//!    |                |
//! munmap()        munmap()
//! unlink()        (no unlink)
//! ```
//!
//! A freshly created object is zero filled by the kernel, so `T` must be valid
//! as all-zero bytes (see [`SharedMemorySafe`]). Openers never initialize
//! anything; they reinterpret what the creator left there.

use rustix::fs::{fstat, ftruncate, Mode};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::{io, shm};
use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::Deref;
use std::ptr::{null_mut, NonNull};
use std::sync::atomic::*;

/// Result alias for shared memory operations
pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors produced while creating or attaching a segment
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("invalid shared memory name `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("{op} failed for `{path}`: {source}")]
    Posix {
        op: &'static str,
        path: String,
        #[source]
        source: io::Errno,
    },

    #[error("shared memory `{path}` size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: String,
        expected: usize,
        actual: i64,
    },

    #[error("shared memory `{path}` was not initialized by its owner within {waited_ms} ms")]
    InitTimeout { path: String, waited_ms: u64 },

    #[error("shared memory `{path}` has an incompatible layout: {reason}")]
    LayoutMismatch { path: String, reason: String },
}

impl ShmError {
    fn posix(op: &'static str, path: &str, err: io::Errno) -> Self {
        Self::Posix {
            op,
            path: path.to_string(),
            source: err,
        }
    }

    /// The errno behind a failed system call, if any
    pub fn errno(&self) -> Option<io::Errno> {
        match self {
            ShmError::Posix { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// Cleanup behavior of a mapping
pub trait ShmMode {
    /// Whether to unlink the name on drop
    const SHOULD_UNLINK: bool;
}

/// The process that created the segment; unmaps and unlinks on drop
pub struct Creator;
impl ShmMode for Creator {
    const SHOULD_UNLINK: bool = true;
}

/// A process attached to an existing segment; unmaps only
pub struct Opener;
impl ShmMode for Opener {
    const SHOULD_UNLINK: bool = false;
}

/// Types that can live in a shared memory segment mapped by several processes
///
/// # Safety
///
/// Implementers must guarantee:
///
/// - **Layout**: `#[repr(C)]` or `#[repr(transparent)]`, so separately compiled
///   processes agree on field offsets.
/// - **Zero init**: the all-zero bit pattern is a valid value. Segments are
///   created zero filled and are never default-constructed.
/// - **No pointers**: no references, boxes or other heap handles; addresses do
///   not transfer between processes.
/// - **Drop safety**: nothing relies on `Drop` running, a killed process never
///   runs it.
/// - **Concurrency**: cross-process access is mediated by atomics.
pub unsafe trait SharedMemorySafe: Send + Sync {}

macro_rules! impl_shared_memory_safe {
    ($($t:ty),* $(,)?) => {
        $(
            unsafe impl SharedMemorySafe for $t {}
        )*
    };
}

impl_shared_memory_safe! {
    i8, i16, i32, i64, isize,
    u8, u16, u32, u64, usize,
    f32, f64,
    AtomicU32, AtomicU64, AtomicUsize,
}

unsafe impl<T: SharedMemorySafe, const N: usize> SharedMemorySafe for [T; N] {}

/// Owned mapping of a named shared memory object as a `T`
pub struct Shm<T: SharedMemorySafe, Mode: ShmMode> {
    ptr: NonNull<T>,
    size: usize,
    path: String,
    _mode: PhantomData<Mode>,
}

// SAFETY: the pointer targets shared memory, not thread-local data, and
// T: SharedMemorySafe already requires Send + Sync.
unsafe impl<T: SharedMemorySafe, Mode: ShmMode> Send for Shm<T, Mode> {}
unsafe impl<T: SharedMemorySafe, Mode: ShmMode> Sync for Shm<T, Mode> {}

const POSIX_NAME_MAX: usize = 255;

/// Check a POSIX shared memory name (`/name`, no further slashes)
pub fn validate_shm_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(ShmError::InvalidPath {
            path: path.to_string(),
            reason: "path must start with '/'",
        });
    }

    if path.len() == 1 {
        return Err(ShmError::InvalidPath {
            path: path.to_string(),
            reason: "path must have a name after '/'",
        });
    }

    if path[1..].contains('/') {
        return Err(ShmError::InvalidPath {
            path: path.to_string(),
            reason: "path must not contain additional '/' characters",
        });
    }

    if path.len() > POSIX_NAME_MAX {
        return Err(ShmError::InvalidPath {
            path: path.to_string(),
            reason: "path length must be <= 255 bytes",
        });
    }

    Ok(())
}

/// Remove a segment name left behind by an owner that did not shut down cleanly
///
/// Returns `true` if a name was removed. Processes still mapping the old object
/// keep their mapping; new openers see the next segment created under the name.
pub fn unlink_stale(path: &str) -> Result<bool> {
    validate_shm_path(path)?;
    match shm::unlink(path) {
        Ok(()) => Ok(true),
        Err(io::Errno::NOENT) => Ok(false),
        Err(err) => Err(ShmError::posix("shm_unlink", path, err)),
    }
}

impl<T: SharedMemorySafe> Shm<T, Creator> {
    /// Create a new segment sized to exactly `size_of::<T>()`
    ///
    /// Fails if the name already exists. The contents start out zeroed.
    pub fn create(path: &str) -> Result<Self> {
        validate_shm_path(path)?;

        let fd = shm::open(
            path,
            shm::OFlags::CREATE | shm::OFlags::EXCL | shm::OFlags::RDWR,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP | Mode::ROTH | Mode::WOTH,
        )
        .map_err(|err| ShmError::posix("shm_open", path, err))?;

        if let Err(e) = ftruncate(&fd, size_of::<T>() as u64) {
            drop(fd);
            let _ = shm::unlink(path);
            return Err(ShmError::posix("ftruncate", path, e));
        }

        // SAFETY: fresh shared mapping of a valid fd of exactly size_of::<T>()
        // bytes. mmap returns page-aligned addresses, which satisfies T's
        // alignment, and aliases no Rust object in this process.
        let ptr_result = unsafe {
            mmap(
                null_mut(),
                size_of::<T>(),
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
        };
        let ptr = match ptr_result {
            Ok(p) => p,
            Err(err) => {
                drop(fd);
                let _ = shm::unlink(path);
                return Err(ShmError::posix("mmap", path, err));
            }
        };

        // SAFETY: mmap never returns null on success
        let ptr = unsafe { NonNull::new_unchecked(ptr as *mut T) };

        log::debug!("Created shared memory {} ({} bytes)", path, size_of::<T>());

        Ok(Self {
            ptr,
            size: size_of::<T>(),
            path: path.to_string(),
            _mode: PhantomData,
        })
    }
}

impl<T: SharedMemorySafe> Shm<T, Opener> {
    /// Map an existing segment; its size must be exactly `size_of::<T>()`
    pub fn open(path: &str) -> Result<Self> {
        validate_shm_path(path)?;

        let fd = shm::open(path, shm::OFlags::RDWR, Mode::empty())
            .map_err(|err| ShmError::posix("shm_open", path, err))?;

        let stat = fstat(&fd).map_err(|err| ShmError::posix("fstat", path, err))?;
        let actual = stat.st_size as i64;
        if actual != size_of::<T>() as i64 {
            return Err(ShmError::SizeMismatch {
                path: path.to_string(),
                expected: size_of::<T>(),
                actual,
            });
        }

        // SAFETY: the object exists and fstat confirmed its size. The mapping is
        // page aligned and does not alias local objects; cross-process access is
        // covered by T: SharedMemorySafe.
        let ptr_result = unsafe {
            mmap(
                null_mut(),
                size_of::<T>(),
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
        };
        let ptr = ptr_result.map_err(|err| ShmError::posix("mmap", path, err))?;

        // SAFETY: mmap never returns null on success
        let ptr = unsafe { NonNull::new_unchecked(ptr as *mut T) };

        Ok(Self {
            ptr,
            size: size_of::<T>(),
            path: path.to_string(),
            _mode: PhantomData,
        })
    }
}

impl<T: SharedMemorySafe, Mode: ShmMode> Shm<T, Mode> {
    /// The segment name
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl<T: SharedMemorySafe, Mode: ShmMode> Drop for Shm<T, Mode> {
    fn drop(&mut self) {
        // SAFETY: ptr/size describe the mapping created in create/open
        unsafe {
            let _ = munmap(self.ptr.as_ptr() as *mut _, self.size);
        }

        if Mode::SHOULD_UNLINK {
            match shm::unlink(&self.path) {
                Ok(()) => log::debug!("Unlinked shared memory {}", self.path),
                Err(err) => log::warn!("shm_unlink failed for {}: {}", self.path, err),
            }
        }
    }
}

impl<T: SharedMemorySafe, Mode: ShmMode> Deref for Shm<T, Mode> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the mapping stays valid until Drop, and the zeroed contents
        // are a valid T by the SharedMemorySafe contract.
        unsafe { &*self.ptr.as_ptr() }
    }
}
