//! Device abstraction for pass-through scantools.
//!
//! This module provides a unified `Device` trait that abstracts over the
//! concrete interface hardware (serial-line ELM/AVT adapters, J2534
//! pass-through devices, scripted test doubles). The protocol and session
//! layers are written against this trait only, keeping them I/O-agnostic.
//!
//! ```text
//! +------------------+
//! |  Session Layer   |
//! | (PcmSession)     |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |   Device Trait   |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | ELM / AVT / J2534|
//! +------------------+
//! ```

use std::fmt;
use std::time::Duration;

use crate::error::Result;
use crate::protocol::message::Message;

/// VPW bus speed.
///
/// J1850 VPW runs at 10.4 kbps; most GM PCMs support a quadruple-speed
/// mode used for bulk transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VpwSpeed {
    /// Standard 10.4 kbps.
    #[default]
    OneX,
    /// 41.6 kbps bulk-transfer mode.
    FourX,
}

impl fmt::Display for VpwSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneX => write!(f, "1x"),
            Self::FourX => write!(f, "4x"),
        }
    }
}

/// Receive-timeout profile for the current operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScenario {
    /// Reading identifiers and other single-frame properties.
    ReadProperty,
    /// Writing blocks and streaming kernel chunks.
    WriteMemory,
    /// Bulk flash writes; the PCM may stall while erasing.
    Maximum,
}

impl TimeoutScenario {
    /// The receive window this scenario allows.
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Self::ReadProperty => Duration::from_millis(3000),
            Self::WriteMemory => Duration::from_millis(1000),
            Self::Maximum => Duration::from_secs(30),
        }
    }
}

/// Unified trait for half-duplex VPW interface devices.
///
/// A device owns one physical connection to the bus. Frames are sent and
/// received whole; the device is responsible for transport-level framing
/// and for buffering inbound traffic until the session asks for it.
pub trait Device {
    /// Bring the interface up. Must be called before any other operation.
    fn initialize(&mut self) -> Result<()>;

    /// Transmit one frame onto the bus.
    fn send_frame(&mut self, frame: &Message) -> Result<()>;

    /// Receive the next buffered frame, or `None` once the current
    /// timeout window elapses without traffic.
    fn receive_frame(&mut self) -> Option<Message>;

    /// Switch the interface between 1x and 4x VPW.
    fn set_speed(&mut self, speed: VpwSpeed) -> Result<()>;

    /// Discard any buffered inbound frames.
    fn clear_queue(&mut self);

    /// Select the receive-timeout profile for subsequent operations.
    fn set_timeout(&mut self, scenario: TimeoutScenario);

    /// Whether this interface hardware can run the bus at 4x.
    fn supports_4x(&self) -> bool;

    /// Largest frame this device can transmit, in bytes.
    fn max_send_size(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_scenario_durations() {
        assert_eq!(
            TimeoutScenario::ReadProperty.duration(),
            Duration::from_millis(3000)
        );
        assert_eq!(
            TimeoutScenario::WriteMemory.duration(),
            Duration::from_millis(1000)
        );
        assert!(TimeoutScenario::Maximum.duration() > TimeoutScenario::ReadProperty.duration());
    }

    #[test]
    fn test_vpw_speed_display() {
        assert_eq!(VpwSpeed::OneX.to_string(), "1x");
        assert_eq!(VpwSpeed::FourX.to_string(), "4x");
    }
}
