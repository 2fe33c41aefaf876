//! Inbound response frame decoding.
//!
//! Each parser takes the raw bytes of one (or, for multi-block
//! identifiers, several) response frames and returns a typed result.
//! A mode `0x7F` frame is the PCM refusing the request named in its
//! fifth byte; parsers surface that as `Ok(false)` where the caller asked
//! a yes/no question and as [`Error::Refused`] where data was expected.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::pcm::BlockId;
use crate::protocol::{mode, submode, DEVICE_ID_PCM, DEVICE_ID_TOOL};

/// The seed reply a PCM sends when security access is already open.
const ALREADY_UNLOCKED: [u8; 6] = [0x6C, DEVICE_ID_TOOL, DEVICE_ID_PCM, 0x67, 0x01, 0x37];

fn is_reject(bytes: &[u8], request_mode: u8) -> bool {
    bytes.len() >= 5 && bytes[3] == mode::REJECT && bytes[4] == request_mode
}

fn check_response(bytes: &[u8], request_mode: u8, submode: Option<u8>) -> Result<()> {
    let wanted = 4 + usize::from(submode.is_some());
    if bytes.len() < wanted {
        return Err(Error::UnexpectedResponse(format!(
            "frame too short for mode {request_mode:02X} response: {} bytes",
            bytes.len()
        )));
    }
    if is_reject(bytes, request_mode) {
        return Err(Error::Refused(format!(
            "PCM refused mode {request_mode:02X} request (code {:02X})",
            bytes.get(5).copied().unwrap_or(0)
        )));
    }
    if bytes[1] != DEVICE_ID_TOOL
        || bytes[2] != DEVICE_ID_PCM
        || bytes[3] != request_mode.wrapping_add(mode::RESPONSE)
    {
        return Err(Error::UnexpectedResponse(format!(
            "not a mode {request_mode:02X} response: {:02X} {:02X} {:02X} {:02X}",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )));
    }
    if let Some(sub) = submode {
        if bytes[4] != sub {
            return Err(Error::UnexpectedResponse(format!(
                "mode {request_mode:02X} response carries submode {:02X}, wanted {sub:02X}",
                bytes[4]
            )));
        }
    }
    Ok(())
}

/// Decode a block-read response and return its data bytes.
pub fn parse_block_response(bytes: &[u8], block: BlockId) -> Result<&[u8]> {
    check_response(bytes, mode::READ_BLOCK, Some(block.code()))?;
    let data = &bytes[5..];
    if data.len() < block.payload_len() {
        return Err(Error::Truncated {
            expected: block.payload_len(),
            actual: data.len(),
        });
    }
    Ok(&data[..block.payload_len()])
}

/// Assemble the 17-character VIN from its three block responses.
pub fn parse_vin_responses(b1: &[u8], b2: &[u8], b3: &[u8]) -> Result<String> {
    let d1 = parse_block_response(b1, BlockId::Vin1)?;
    let d2 = parse_block_response(b2, BlockId::Vin2)?;
    let d3 = parse_block_response(b3, BlockId::Vin3)?;

    // Block 1 leads with a padding byte; only 5 of its 6 bytes are VIN.
    let mut vin = Vec::with_capacity(17);
    vin.extend_from_slice(&d1[1..]);
    vin.extend_from_slice(d2);
    vin.extend_from_slice(d3);
    ascii_string(&vin, "VIN")
}

/// Assemble the 12-character serial number from its three block responses.
pub fn parse_serial_responses(b1: &[u8], b2: &[u8], b3: &[u8]) -> Result<String> {
    let d1 = parse_block_response(b1, BlockId::Serial1)?;
    let d2 = parse_block_response(b2, BlockId::Serial2)?;
    let d3 = parse_block_response(b3, BlockId::Serial3)?;

    let mut serial = Vec::with_capacity(12);
    serial.extend_from_slice(d1);
    serial.extend_from_slice(d2);
    serial.extend_from_slice(d3);
    ascii_string(&serial, "serial number")
}

/// Decode the broadcast code.
pub fn parse_bcc_response(bytes: &[u8]) -> Result<String> {
    let data = parse_block_response(bytes, BlockId::Bcc)?;
    ascii_string(data, "broadcast code")
}

/// Decode the manufacturers enable counter.
pub fn parse_mec_response(bytes: &[u8]) -> Result<u8> {
    let data = parse_block_response(bytes, BlockId::Mec)?;
    Ok(data[0])
}

/// Extract a 32-bit big-endian identifier from a block-read response.
pub fn parse_block_u32(bytes: &[u8]) -> Result<u32> {
    check_response(bytes, mode::READ_BLOCK, None)?;
    if bytes.len() < 9 {
        return Err(Error::Truncated {
            expected: 9,
            actual: bytes.len(),
        });
    }
    Ok(BigEndian::read_u32(&bytes[5..9]))
}

/// Whether this seed response means security access is already open.
#[must_use]
pub fn is_unlocked(bytes: &[u8]) -> bool {
    bytes == ALREADY_UNLOCKED
}

/// Extract the 16-bit seed. A seed of `0x0000` means no unlock is
/// required on this operating system.
pub fn parse_seed(bytes: &[u8]) -> Result<u16> {
    check_response(bytes, mode::SECURITY_ACCESS, Some(0x01))?;
    if bytes.len() < 7 {
        return Err(Error::Truncated {
            expected: 7,
            actual: bytes.len(),
        });
    }
    Ok(BigEndian::read_u16(&bytes[5..7]))
}

/// Decode the key-submission reply.
///
/// `Ok(true)` means the PCM accepted the key. A recognized refusal comes
/// back as [`Error::Refused`] with a human-readable diagnostic.
pub fn parse_unlock_response(bytes: &[u8]) -> Result<bool> {
    check_response(bytes, mode::SECURITY_ACCESS, Some(0x02))?;
    if bytes.len() < 6 {
        return Err(Error::Truncated {
            expected: 6,
            actual: bytes.len(),
        });
    }
    match bytes[5] {
        0x34 => Ok(true),
        0x35 => Err(Error::Refused("the key was incorrect".into())),
        0x36 => Err(Error::Refused(
            "too many failed attempts, cycle ignition power".into(),
        )),
        0x37 => Err(Error::Refused("the retry delay has not expired".into())),
        other => Err(Error::UnexpectedResponse(format!(
            "unknown unlock status {other:02X}"
        ))),
    }
}

/// Decode the reply to an upload-permission request.
pub fn parse_upload_response(bytes: &[u8]) -> Result<bool> {
    if is_reject(bytes, mode::REQUEST_UPLOAD) {
        return Ok(false);
    }
    check_response(bytes, mode::REQUEST_UPLOAD, Some(0x00))?;
    Ok(true)
}

/// Decode the reply to a memory-read request.
///
/// `Ok(true)` when the PCM accepts and a payload frame will follow;
/// `Ok(false)` when it rejects the read.
pub fn parse_read_response(bytes: &[u8]) -> Result<bool> {
    if is_reject(bytes, mode::READ_MEMORY) {
        return Ok(false);
    }
    check_response(bytes, mode::READ_MEMORY, Some(0x01))?;
    Ok(true)
}

/// Decode the write kernel's reply to the start-full-flash command.
pub fn parse_start_full_flash_response(bytes: &[u8]) -> Result<bool> {
    if is_reject(bytes, mode::READ_BLOCK) {
        return Ok(false);
    }
    check_response(bytes, mode::READ_BLOCK, Some(0x01))?;
    Ok(true)
}

/// Decode a kernel acknowledgement of one block-data frame.
pub fn parse_block_transfer_ack(bytes: &[u8]) -> Result<bool> {
    if is_reject(bytes, mode::TRANSFER_DATA) {
        return Ok(false);
    }
    if bytes.len() >= 4
        && bytes[1] == DEVICE_ID_TOOL
        && bytes[2] == DEVICE_ID_PCM
        && bytes[3] == mode::TRANSFER_DATA + mode::RESPONSE
    {
        return Ok(true);
    }
    Err(Error::UnexpectedResponse(format!(
        "not a block transfer ack: {} bytes",
        bytes.len()
    )))
}

/// Decode a kernel liveness-ping reply.
pub fn parse_kernel_ping_response(bytes: &[u8]) -> Result<bool> {
    if is_reject(bytes, mode::KERNEL_PING) {
        return Ok(false);
    }
    check_response(bytes, mode::KERNEL_PING, Some(0x00))?;
    Ok(true)
}

/// Classify a memory-read payload frame.
pub enum ReadPayload<'a> {
    /// Literal bytes for the requested range.
    Literal(&'a [u8]),
    /// The requested range is `run` copies of `value`.
    RunLength {
        /// Number of bytes the fill covers.
        run: usize,
        /// Fill byte.
        value: u8,
    },
}

/// Decode the mode-0x36 payload frame that follows an accepted read.
///
/// Byte 4 selects the encoding: `0x01` literal, `0x02` run-length.
/// Any other marker is an error so the caller retries the block.
pub fn parse_read_payload(bytes: &[u8], length: usize) -> Result<ReadPayload<'_>> {
    if bytes.len() < 11 || bytes[3] != mode::TRANSFER_DATA {
        return Err(Error::UnexpectedResponse(
            "not a memory-read payload frame".into(),
        ));
    }
    match bytes[4] {
        submode::READ_LITERAL => {
            let data = &bytes[10..];
            if data.len() < length + 2 {
                return Err(Error::Truncated {
                    expected: length + 2,
                    actual: data.len(),
                });
            }
            Ok(ReadPayload::Literal(&data[..length]))
        }
        submode::READ_RLE => {
            let run = BigEndian::read_u16(&bytes[5..7]) as usize;
            if run == 0 {
                return Err(Error::UnexpectedResponse("zero-length run".into()));
            }
            Ok(ReadPayload::RunLength {
                run,
                value: bytes[10],
            })
        }
        other => Err(Error::UnexpectedResponse(format!(
            "unknown read payload marker {other:02X}"
        ))),
    }
}

fn ascii_string(data: &[u8], what: &str) -> Result<String> {
    if !data.is_ascii() {
        return Err(Error::Protocol(format!("{what} is not ASCII: {data:02X?}")));
    }
    Ok(String::from_utf8_lossy(data).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_response(block: u8, data: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0x6C, 0xF0, 0x10, 0x7C, block];
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn test_parse_vin_responses() {
        let b1 = block_response(0x01, b"\x001G1YY");
        let b2 = block_response(0x02, b"22G965");
        let b3 = block_response(0x03, b"100001");
        let vin = parse_vin_responses(&b1, &b2, &b3).unwrap();
        assert_eq!(vin, "1G1YY22G965100001");
    }

    #[test]
    fn test_parse_vin_block_mismatch() {
        let b1 = block_response(0x02, b"\x001G1YY");
        let b2 = block_response(0x02, b"22G965");
        let b3 = block_response(0x03, b"100001");
        assert!(matches!(
            parse_vin_responses(&b1, &b2, &b3),
            Err(Error::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_parse_serial_responses() {
        let b1 = block_response(0x05, b"12AB");
        let b2 = block_response(0x06, b"CD34");
        let b3 = block_response(0x07, b"EF56");
        assert_eq!(parse_serial_responses(&b1, &b2, &b3).unwrap(), "12ABCD34EF56");
    }

    #[test]
    fn test_parse_bcc_and_mec() {
        assert_eq!(
            parse_bcc_response(&block_response(0x14, b"ABCD")).unwrap(),
            "ABCD"
        );
        assert_eq!(parse_mec_response(&block_response(0xA0, &[0x07])).unwrap(), 7);
    }

    #[test]
    fn test_parse_block_u32() {
        let r = block_response(0x0A, &[0x00, 0xBC, 0x61, 0x4E]);
        assert_eq!(parse_block_u32(&r).unwrap(), 12_345_678);
    }

    #[test]
    fn test_parse_seed() {
        let r = vec![0x6C, 0xF0, 0x10, 0x67, 0x01, 0x12, 0x34];
        assert_eq!(parse_seed(&r).unwrap(), 0x1234);
    }

    #[test]
    fn test_parse_seed_zero_means_no_unlock() {
        let r = vec![0x6C, 0xF0, 0x10, 0x67, 0x01, 0x00, 0x00];
        assert_eq!(parse_seed(&r).unwrap(), 0x0000);
    }

    #[test]
    fn test_is_unlocked() {
        assert!(is_unlocked(&[0x6C, 0xF0, 0x10, 0x67, 0x01, 0x37]));
        assert!(!is_unlocked(&[0x6C, 0xF0, 0x10, 0x67, 0x01, 0x12, 0x34]));
    }

    #[test]
    fn test_parse_unlock_response() {
        let ok = vec![0x6C, 0xF0, 0x10, 0x67, 0x02, 0x34];
        assert!(parse_unlock_response(&ok).unwrap());

        let wrong_key = vec![0x6C, 0xF0, 0x10, 0x67, 0x02, 0x35];
        match parse_unlock_response(&wrong_key) {
            Err(Error::Refused(reason)) => assert!(reason.contains("incorrect")),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_upload_response() {
        assert!(parse_upload_response(&[0x6C, 0xF0, 0x10, 0x74, 0x00]).unwrap());
        assert!(!parse_upload_response(&[0x6C, 0xF0, 0x10, 0x7F, 0x34, 0x11]).unwrap());
    }

    #[test]
    fn test_parse_read_response() {
        assert!(parse_read_response(&[0x6C, 0xF0, 0x10, 0x75, 0x01]).unwrap());
        assert!(!parse_read_response(&[0x6C, 0xF0, 0x10, 0x7F, 0x35, 0x31]).unwrap());
    }

    #[test]
    fn test_parse_read_payload_literal() {
        let mut frame = vec![0x6D, 0xF0, 0x10, 0x36, 0x01, 0x00, 0x05, 0x00, 0x00, 0x00];
        frame.extend_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x00, 0x00]);
        match parse_read_payload(&frame, 5).unwrap() {
            ReadPayload::Literal(data) => assert_eq!(data, &[0x11, 0x22, 0x33, 0x44, 0x55]),
            ReadPayload::RunLength { .. } => panic!("expected literal"),
        }
    }

    #[test]
    fn test_parse_read_payload_rle() {
        let frame = vec![
            0x6D, 0xF0, 0x10, 0x36, 0x02, 0x00, 0x05, 0x00, 0x00, 0x00, 0xAA, 0x00, 0x00,
        ];
        match parse_read_payload(&frame, 5).unwrap() {
            ReadPayload::RunLength { run, value } => {
                assert_eq!(run, 5);
                assert_eq!(value, 0xAA);
            }
            ReadPayload::Literal(_) => panic!("expected run-length"),
        }
    }

    #[test]
    fn test_parse_read_payload_unknown_marker() {
        let frame = vec![
            0x6D, 0xF0, 0x10, 0x36, 0x03, 0x00, 0x05, 0x00, 0x00, 0x00, 0xAA, 0x00, 0x00,
        ];
        assert!(parse_read_payload(&frame, 5).is_err());
    }

    #[test]
    fn test_reject_frame_becomes_refused() {
        let reject = vec![0x6C, 0xF0, 0x10, 0x7F, 0x3C, 0x31];
        assert!(matches!(
            parse_block_u32(&reject),
            Err(Error::Refused(_))
        ));
    }
}
