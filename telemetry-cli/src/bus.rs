//! SocketCAN frame source

use anyhow::Result;
use telemetry_core::FrameSource;

use crate::config::BusConfig;

/// Open the configured bus interface
#[cfg(target_os = "linux")]
pub fn open(config: &BusConfig) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(linux::SocketCanSource::open(config)?))
}

#[cfg(not(target_os = "linux"))]
pub fn open(config: &BusConfig) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "Cannot open {}: SocketCAN is only available on Linux",
        config.interface
    )
}

#[cfg(target_os = "linux")]
mod linux {
    use anyhow::{Context, Result};
    use socketcan::{CanSocket, EmbeddedFrame, Frame, Socket};
    use std::io;
    use std::time::Duration;
    use telemetry_core::types::now_millis;
    use telemetry_core::{CanFrame, FrameSource};

    use crate::config::BusConfig;

    pub struct SocketCanSource {
        socket: CanSocket,
        interface: String,
    }

    impl SocketCanSource {
        pub fn open(config: &BusConfig) -> Result<Self> {
            let socket = CanSocket::open(&config.interface)
                .with_context(|| format!("Failed to open CAN interface {}", config.interface))?;
            socket
                .set_read_timeout(Duration::from_millis(config.read_timeout_ms))
                .with_context(|| format!("Failed to set read timeout on {}", config.interface))?;

            log::info!(
                "Listening on {} (read timeout {} ms)",
                config.interface,
                config.read_timeout_ms
            );
            Ok(Self {
                socket,
                interface: config.interface.clone(),
            })
        }
    }

    impl FrameSource for SocketCanSource {
        fn read_frame(&mut self) -> io::Result<Option<CanFrame>> {
            let frame = match self.socket.read_frame() {
                Ok(frame) => frame,
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(e),
            };

            if frame.is_error_frame() {
                log::debug!("Error frame on {}: 0x{:X}", self.interface, frame.raw_id());
                return Ok(None);
            }
            if frame.is_remote_frame() {
                log::trace!("Remote frame 0x{:X} ignored", frame.raw_id());
                return Ok(None);
            }

            let timestamp_ms = now_millis().max(0) as u64;
            Ok(Some(CanFrame::new(frame.raw_id(), timestamp_ms, frame.data())))
        }

        fn describe(&self) -> String {
            format!("SocketCAN {}", self.interface)
        }
    }

    /// A read timeout surfaces as either kind depending on the kernel
    fn is_timeout(e: &io::Error) -> bool {
        matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
    }
}
