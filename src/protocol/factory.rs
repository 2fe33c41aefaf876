//! Outbound request frame constructors.
//!
//! One builder per request. Every builder returns a fully-formed frame
//! ready to hand to the device; block-data builders include the trailing
//! checksum.

use byteorder::{BigEndian, WriteBytesExt};

use crate::pcm::BlockId;
use crate::protocol::message::{append_block_sum, Message};
use crate::protocol::{
    mode, submode, DEVICE_ID_BROADCAST, DEVICE_ID_PCM, DEVICE_ID_TOOL, PRIORITY_BLOCK,
    PRIORITY_PHYSICAL,
};

fn command(destination: u8, frame_mode: u8, payload: &[u8]) -> Message {
    let mut bytes = Vec::with_capacity(4 + payload.len());
    bytes.push(PRIORITY_PHYSICAL);
    bytes.push(destination);
    bytes.push(DEVICE_ID_TOOL);
    bytes.push(frame_mode);
    bytes.extend_from_slice(payload);
    Message::new(bytes)
}

/// Query one logical block.
///
/// Identifier blocks (VIN, serial, BCC, MEC) go out as broadcast queries;
/// the u32 id blocks are physically addressed to the PCM.
pub fn read_block_request(block: BlockId) -> Message {
    let destination = if block.is_broadcast_query() {
        DEVICE_ID_BROADCAST
    } else {
        DEVICE_ID_PCM
    };
    command(destination, mode::READ_BLOCK, &[block.code()])
}

/// Write one logical block: `6C 10 F0 3B <block> <data…>`.
pub fn write_block_request(block: BlockId, data: &[u8]) -> Message {
    let mut payload = Vec::with_capacity(1 + data.len());
    payload.push(block.code());
    payload.extend_from_slice(data);
    command(DEVICE_ID_PCM, mode::WRITE_BLOCK, &payload)
}

/// The acknowledgement the PCM sends for a successful block write:
/// `6C F0 10 7B <block>`.
pub fn write_block_ack(block: BlockId) -> Message {
    Message::new(vec![
        PRIORITY_PHYSICAL,
        DEVICE_ID_TOOL,
        DEVICE_ID_PCM,
        mode::WRITE_BLOCK + mode::RESPONSE,
        block.code(),
    ])
}

/// Ask the PCM for an unlock seed.
pub fn seed_request() -> Message {
    command(DEVICE_ID_PCM, mode::SECURITY_ACCESS, &[0x01])
}

/// Submit the unlock key derived from the seed.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn unlock_request(key: u16) -> Message {
    let mut payload = vec![0x02];
    payload.write_u16::<BigEndian>(key).unwrap();
    command(DEVICE_ID_PCM, mode::SECURITY_ACCESS, &payload)
}

/// Ask permission to upload `size` bytes to `address` in PCM RAM.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn upload_request(size: u16, address: u32) -> Message {
    let mut payload = vec![0x00];
    payload.write_u16::<BigEndian>(size).unwrap();
    write_u24(&mut payload, address);
    command(DEVICE_ID_PCM, mode::REQUEST_UPLOAD, &payload)
}

/// Build one kernel/flash data chunk.
///
/// ```text
/// 6D 10 F0 36 <flag> <len16> <addr24> <payload…> <sum16>
/// ```
///
/// When `execute` is set, the PCM transfers control to `address` after
/// storing the payload.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
#[allow(clippy::cast_possible_truncation)] // chunks are sized to the device
pub fn block_message(payload: &[u8], address: u32, execute: bool) -> Message {
    let mut bytes = Vec::with_capacity(payload.len() + 12);
    bytes.push(PRIORITY_BLOCK);
    bytes.push(DEVICE_ID_PCM);
    bytes.push(DEVICE_ID_TOOL);
    bytes.push(mode::TRANSFER_DATA);
    bytes.push(if execute {
        submode::EXECUTE
    } else {
        submode::NO_EXECUTE
    });
    bytes.write_u16::<BigEndian>(payload.len() as u16).unwrap();
    write_u24(&mut bytes, address);
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&[0x00, 0x00]);
    Message::new(append_block_sum(bytes))
}

/// Request `length` bytes of PCM memory starting at `address`.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn read_request(address: u32, length: u16) -> Message {
    let mut payload = vec![0x01];
    payload.write_u16::<BigEndian>(length).unwrap();
    write_u24(&mut payload, address);
    command(DEVICE_ID_PCM, mode::READ_MEMORY, &payload)
}

/// Ask whether the PCM will tolerate the bus at 4x.
pub fn high_speed_check() -> Message {
    command(DEVICE_ID_BROADCAST, mode::HIGH_SPEED_CHECK, &[])
}

/// The prefix of the PCM's 4x-permission reply. Trailing bytes vary by
/// operating system, so callers compare prefixes only.
pub fn high_speed_ok_response() -> Message {
    Message::new(vec![
        PRIORITY_PHYSICAL,
        DEVICE_ID_TOOL,
        DEVICE_ID_PCM,
        mode::HIGH_SPEED_CHECK,
    ])
}

/// Broadcast the switch to 4x. Every module still on the bus must hear it.
pub fn begin_high_speed() -> Message {
    command(DEVICE_ID_BROADCAST, mode::HIGH_SPEED_BEGIN, &[])
}

/// Suppress normal bus chatter while a transfer is in progress.
pub fn disable_normal_message_transmission() -> Message {
    command(DEVICE_ID_BROADCAST, mode::DISABLE_NORMAL_TRANSMISSION, &[])
}

/// Tool-present keep-alive.
pub fn device_present_notification() -> Message {
    command(DEVICE_ID_BROADCAST, mode::DEVICE_PRESENT, &[])
}

/// Instruct a running kernel to return control to the operating system.
pub fn exit_kernel() -> Message {
    command(DEVICE_ID_PCM, mode::EXIT_KERNEL, &[])
}

/// Liveness ping answered only by a running kernel.
pub fn kernel_ping() -> Message {
    command(DEVICE_ID_PCM, mode::KERNEL_PING, &[0x00])
}

/// Tell the write kernel to begin a full flash rewrite.
pub fn start_full_flash() -> Message {
    command(DEVICE_ID_PCM, mode::READ_BLOCK, &[0x01])
}

#[allow(clippy::cast_possible_truncation)] // low 24 bits by construction
fn write_u24(out: &mut Vec<u8>, value: u32) {
    out.push((value >> 16) as u8);
    out.push((value >> 8) as u8);
    out.push(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::calc_block_sum;

    #[test]
    fn test_read_block_request_broadcast() {
        let m = read_block_request(BlockId::Vin1);
        assert_eq!(m.bytes(), &[0x6C, 0xFE, 0xF0, 0x3C, 0x01]);
    }

    #[test]
    fn test_read_block_request_physical() {
        let m = read_block_request(BlockId::OperatingSystemId);
        assert_eq!(m.bytes(), &[0x6C, 0x10, 0xF0, 0x3C, 0x0A]);
    }

    #[test]
    fn test_write_block_request() {
        let m = write_block_request(BlockId::Vin2, b"012345");
        assert_eq!(
            m.bytes(),
            &[0x6C, 0x10, 0xF0, 0x3B, 0x02, 0x30, 0x31, 0x32, 0x33, 0x34, 0x35]
        );
    }

    #[test]
    fn test_write_block_ack() {
        let m = write_block_ack(BlockId::Vin2);
        assert_eq!(m.bytes(), &[0x6C, 0xF0, 0x10, 0x7B, 0x02]);
    }

    #[test]
    fn test_seed_and_unlock_requests() {
        assert_eq!(seed_request().bytes(), &[0x6C, 0x10, 0xF0, 0x27, 0x01]);
        assert_eq!(
            unlock_request(0x1234).bytes(),
            &[0x6C, 0x10, 0xF0, 0x27, 0x02, 0x12, 0x34]
        );
    }

    #[test]
    fn test_upload_request() {
        let m = upload_request(0x0190, 0xFF_9150);
        assert_eq!(
            m.bytes(),
            &[0x6C, 0x10, 0xF0, 0x34, 0x00, 0x01, 0x90, 0xFF, 0x91, 0x50]
        );
    }

    #[test]
    fn test_block_message_layout() {
        let m = block_message(&[0xAA, 0xBB], 0xFF_9150, true);
        let b = m.bytes();
        assert_eq!(&b[..4], &[0x6D, 0x10, 0xF0, 0x36]);
        assert_eq!(b[4], 0x80);
        assert_eq!(&b[5..7], &[0x00, 0x02]);
        assert_eq!(&b[7..10], &[0xFF, 0x91, 0x50]);
        assert_eq!(&b[10..12], &[0xAA, 0xBB]);
        assert_eq!(b.len(), 14);
    }

    #[test]
    fn test_block_message_checksum_matches_trailer() {
        let payload: Vec<u8> = (0u8..64).collect();
        let m = block_message(&payload, 0xFF_A000, false);
        let b = m.bytes();
        let sum = calc_block_sum(b);
        assert_eq!(&b[b.len() - 2..], &[(sum >> 8) as u8, sum as u8]);
    }

    #[test]
    fn test_read_request() {
        let m = read_request(0x01_2345, 200);
        assert_eq!(
            m.bytes(),
            &[0x6C, 0x10, 0xF0, 0x35, 0x01, 0x00, 0xC8, 0x01, 0x23, 0x45]
        );
    }

    #[test]
    fn test_high_speed_frames() {
        assert_eq!(high_speed_check().bytes(), &[0x6C, 0xFE, 0xF0, 0xA0]);
        assert_eq!(high_speed_ok_response().bytes(), &[0x6C, 0xF0, 0x10, 0xA0]);
        assert_eq!(begin_high_speed().bytes(), &[0x6C, 0xFE, 0xF0, 0xA1]);
    }

    #[test]
    fn test_housekeeping_frames() {
        assert_eq!(
            disable_normal_message_transmission().bytes(),
            &[0x6C, 0xFE, 0xF0, 0x28]
        );
        assert_eq!(
            device_present_notification().bytes(),
            &[0x6C, 0xFE, 0xF0, 0x3F]
        );
        assert_eq!(exit_kernel().bytes(), &[0x6C, 0x10, 0xF0, 0x20]);
        assert_eq!(start_full_flash().bytes(), &[0x6C, 0x10, 0xF0, 0x3C, 0x01]);
    }
}
