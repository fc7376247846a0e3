//! Process control flags driven by POSIX signals
//!
//! SIGINT/SIGTERM request shutdown and SIGHUP requests a channel table reload.
//! Handlers only flip atomics; the main loop checks them once per iteration.

use anyhow::{Context, Result};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ControlFlags {
    shutdown: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
}

impl ControlFlags {
    /// Flags not wired to any signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the signal handlers
    ///
    /// A second SIGINT/SIGTERM while shutdown is already pending terminates the
    /// process immediately.
    pub fn install() -> Result<Self> {
        let flags = Self::new();
        for signal in [SIGINT, SIGTERM] {
            flag::register_conditional_shutdown(signal, 1, Arc::clone(&flags.shutdown))
                .with_context(|| format!("Failed to register handler for signal {}", signal))?;
            flag::register(signal, Arc::clone(&flags.shutdown))
                .with_context(|| format!("Failed to register handler for signal {}", signal))?;
        }
        flag::register(SIGHUP, Arc::clone(&flags.reload))
            .context("Failed to register SIGHUP handler")?;
        Ok(flags)
    }

    pub fn should_stop(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Consume a pending reload request
    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_is_consumed_once() {
        let flags = ControlFlags::new();
        assert!(!flags.take_reload());
        flags.request_reload();
        assert!(flags.take_reload());
        assert!(!flags.take_reload());
    }

    #[test]
    fn test_clones_share_state() {
        let flags = ControlFlags::new();
        let other = flags.clone();
        other.request_shutdown();
        assert!(flags.should_stop());
    }

    #[test]
    fn test_sighup_sets_reload() {
        let flags = ControlFlags::install().unwrap();
        signal_hook::low_level::raise(SIGHUP).unwrap();
        assert!(flags.take_reload());
        assert!(!flags.should_stop());
    }
}
