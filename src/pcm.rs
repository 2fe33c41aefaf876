//! Target descriptors for supported PCM variants.
//!
//! A `PcmInfo` captures the memory geometry and unlock parameters of one
//! PCM operating-system family. The session layer takes a descriptor and
//! never hard-codes addresses itself.

use std::fmt;

/// Memory geometry and unlock parameters for a target PCM.
#[derive(Debug, Clone)]
pub struct PcmInfo {
    /// First address of the flash image.
    pub image_base_address: u32,
    /// Flash image size in bytes.
    pub image_size: u32,
    /// RAM address kernels are uploaded to and executed from.
    pub kernel_base_address: u32,
    /// Seed/key transform selector for this operating system.
    pub key_algorithm_id: u16,
}

impl PcmInfo {
    /// Descriptor for the common 512 KiB V6 PCM.
    pub fn new() -> Self {
        Self {
            image_base_address: 0x00_0000,
            image_size: 512 * 1024,
            kernel_base_address: 0xFF_9150,
            key_algorithm_id: 40,
        }
    }

    /// Set the flash image base address.
    #[must_use]
    pub fn with_image_base(mut self, address: u32) -> Self {
        self.image_base_address = address;
        self
    }

    /// Set the flash image size.
    #[must_use]
    pub fn with_image_size(mut self, size: u32) -> Self {
        self.image_size = size;
        self
    }

    /// Set the kernel load address.
    #[must_use]
    pub fn with_kernel_base(mut self, address: u32) -> Self {
        self.kernel_base_address = address;
        self
    }

    /// Set the seed/key algorithm id.
    #[must_use]
    pub fn with_key_algorithm(mut self, id: u16) -> Self {
        self.key_algorithm_id = id;
        self
    }
}

impl Default for PcmInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Writable and readable logical blocks.
///
/// Identifier data lives in fixed-size blocks addressed by these codes.
/// VIN blocks carry 6 data bytes each; serial blocks 4; the broadcast
/// code 4; the manufacturers enable counter a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockId {
    /// VIN characters 1-5 (first byte of the block is padding).
    Vin1 = 0x01,
    /// VIN characters 6-11.
    Vin2 = 0x02,
    /// VIN characters 12-17.
    Vin3 = 0x03,
    /// Serial number characters 1-4.
    Serial1 = 0x05,
    /// Serial number characters 5-8.
    Serial2 = 0x06,
    /// Serial number characters 9-12.
    Serial3 = 0x07,
    /// Operating system id (u32).
    OperatingSystemId = 0x0A,
    /// Calibration id (u32).
    CalibrationId = 0x0B,
    /// Hardware id (u32).
    HardwareId = 0x0C,
    /// Broadcast code.
    Bcc = 0x14,
    /// Manufacturers enable counter.
    Mec = 0xA0,
}

impl BlockId {
    /// Wire code for this block.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Fixed data length of this block in bytes.
    #[must_use]
    pub fn payload_len(self) -> usize {
        match self {
            Self::Vin1 | Self::Vin2 | Self::Vin3 => 6,
            Self::Serial1 | Self::Serial2 | Self::Serial3 => 4,
            Self::OperatingSystemId | Self::CalibrationId | Self::HardwareId => 4,
            Self::Bcc => 4,
            Self::Mec => 1,
        }
    }

    /// Whether reads of this block go out as broadcast queries.
    ///
    /// Identifier data (VIN, serial, BCC, MEC) is queried with broadcast
    /// frames; the u32 ids are physically addressed reads.
    #[must_use]
    pub fn is_broadcast_query(self) -> bool {
        !matches!(
            self,
            Self::OperatingSystemId | Self::CalibrationId | Self::HardwareId
        )
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vin1 => write!(f, "VIN block 1"),
            Self::Vin2 => write!(f, "VIN block 2"),
            Self::Vin3 => write!(f, "VIN block 3"),
            Self::Serial1 => write!(f, "serial block 1"),
            Self::Serial2 => write!(f, "serial block 2"),
            Self::Serial3 => write!(f, "serial block 3"),
            Self::OperatingSystemId => write!(f, "operating system id"),
            Self::CalibrationId => write!(f, "calibration id"),
            Self::HardwareId => write!(f, "hardware id"),
            Self::Bcc => write!(f, "broadcast code"),
            Self::Mec => write!(f, "manufacturers enable counter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_descriptor() {
        let info = PcmInfo::new();
        assert_eq!(info.image_base_address, 0x00_0000);
        assert_eq!(info.image_size, 0x8_0000);
        assert_eq!(info.kernel_base_address, 0xFF_9150);
    }

    #[test]
    fn test_builder_overrides() {
        let info = PcmInfo::new()
            .with_image_size(1024 * 1024)
            .with_key_algorithm(14);
        assert_eq!(info.image_size, 0x10_0000);
        assert_eq!(info.key_algorithm_id, 14);
    }

    #[test]
    fn test_block_payload_lengths() {
        assert_eq!(BlockId::Vin1.payload_len(), 6);
        assert_eq!(BlockId::Serial2.payload_len(), 4);
        assert_eq!(BlockId::Mec.payload_len(), 1);
    }

    #[test]
    fn test_block_codes() {
        assert_eq!(BlockId::Vin2.code(), 0x02);
        assert_eq!(BlockId::Bcc.code(), 0x14);
        assert_eq!(BlockId::Mec.code(), 0xA0);
    }

    #[test]
    fn test_broadcast_queries() {
        assert!(BlockId::Vin1.is_broadcast_query());
        assert!(BlockId::Bcc.is_broadcast_query());
        assert!(!BlockId::OperatingSystemId.is_broadcast_query());
    }
}
