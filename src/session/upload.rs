//! Kernel upload and execution.
//!
//! A kernel payload is partitioned into device-sized chunks and streamed
//! into PCM RAM highest-offset first. The chunk at offset zero is sent
//! last with the execute flag set, so by the instant control transfers
//! every higher-addressed byte is already resident.

use log::{debug, info};

use crate::device::{Device, TimeoutScenario};
use crate::error::{Error, Result};
use crate::protocol::{factory, parser};
use crate::session::{PcmSession, REQUEST_RETRIES};

/// Frame overhead around each chunk: 10-byte header plus 2-byte checksum.
const CHUNK_OVERHEAD: usize = 12;

/// One planned transfer unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    /// Offset into the payload (and from the base address).
    pub offset: usize,
    /// Chunk length in bytes.
    pub len: usize,
    /// Whether the PCM executes the payload after storing this chunk.
    pub execute: bool,
}

/// Partition `payload_len` bytes into send order.
///
/// The remainder goes first at the highest offset; full chunks follow
/// from high to low. Exactly one chunk carries the execute flag: the one
/// at offset zero, which is also the remainder when the payload fits in
/// a single chunk.
pub(crate) fn plan_upload(payload_len: usize, max_send_size: usize) -> Vec<Chunk> {
    let chunk = max_send_size - CHUNK_OVERHEAD;
    let full = payload_len / chunk;
    let remainder = payload_len % chunk;

    let mut plan = Vec::with_capacity(full + 1);
    if remainder > 0 {
        plan.push(Chunk {
            offset: full * chunk,
            len: remainder,
            execute: remainder == payload_len,
        });
    }
    for i in (1..=full).rev() {
        let offset = (i - 1) * chunk;
        plan.push(Chunk {
            offset,
            len: chunk,
            execute: offset == 0,
        });
    }
    plan
}

impl<D: Device> PcmSession<D> {
    /// Load `payload` into PCM RAM at `base_address` and transfer
    /// control to it.
    ///
    /// On success the kernel owns the PCM; only [`recover`] or the
    /// kernel's own exit path gives it back.
    ///
    /// [`recover`]: PcmSession::recover
    #[allow(clippy::cast_possible_truncation)] // kernels are well under 64 KiB
    pub fn pcm_execute(&mut self, payload: &[u8], base_address: u32) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::Protocol("refusing to upload an empty kernel".into()));
        }
        if self.kernel_running {
            return Err(Error::Protocol("a kernel is already running".into()));
        }

        self.device.set_timeout(TimeoutScenario::WriteMemory);
        self.suppress_chatter();

        let permission = factory::upload_request(payload.len() as u16, base_address);
        let response = self.send_request(&permission, REQUEST_RETRIES)?;
        if !parser::parse_upload_response(response.bytes())? {
            return Err(Error::Refused(format!(
                "PCM denied upload of {} bytes to {base_address:06X}",
                payload.len()
            )));
        }

        let total = payload.len();
        let mut sent = 0usize;
        for chunk in plan_upload(total, self.device.max_send_size()) {
            if crate::is_interrupt_requested() {
                return Err(Error::Cancelled);
            }
            self.suppress_chatter();

            let address = base_address + chunk.offset as u32;
            debug!(
                "kernel chunk: {} bytes at {address:06X}{}",
                chunk.len,
                if chunk.execute { ", execute" } else { "" }
            );
            let frame = factory::block_message(
                &payload[chunk.offset..chunk.offset + chunk.len],
                address,
                chunk.execute,
            );
            self.send_request(&frame, REQUEST_RETRIES)?;

            sent += chunk.len;
            info!("kernel upload {}%", sent * 100 / total);
        }

        self.kernel_running = true;
        info!("kernel running at {base_address:06X}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::VpwSpeed;
    use crate::protocol::message::Message;
    use crate::protocol::mode;
    use std::collections::VecDeque;

    /// Grants upload permission, swallows everything else, and counts
    /// how many data chunks actually hit the bus.
    struct ScriptedDevice {
        responses: VecDeque<Message>,
        chunks_sent: usize,
    }

    impl ScriptedDevice {
        fn granting_upload() -> Self {
            let mut responses = VecDeque::new();
            responses.push_back(Message::new(vec![0x6C, 0xF0, 0x10, 0x74, 0x00]));
            Self {
                responses,
                chunks_sent: 0,
            }
        }
    }

    impl Device for ScriptedDevice {
        fn initialize(&mut self) -> Result<()> {
            Ok(())
        }

        fn send_frame(&mut self, frame: &Message) -> Result<()> {
            if frame.frame_mode() == Some(mode::TRANSFER_DATA) {
                self.chunks_sent += 1;
            }
            Ok(())
        }

        fn receive_frame(&mut self) -> Option<Message> {
            self.responses.pop_front()
        }

        fn set_speed(&mut self, _speed: VpwSpeed) -> Result<()> {
            Ok(())
        }

        fn clear_queue(&mut self) {}

        fn set_timeout(&mut self, _scenario: TimeoutScenario) {}

        fn supports_4x(&self) -> bool {
            false
        }

        fn max_send_size(&self) -> usize {
            76
        }
    }

    #[test]
    fn test_cancellation_stops_before_the_first_chunk() {
        crate::test_set_interrupted(true);
        let mut session = PcmSession::new(ScriptedDevice::granting_upload());
        let result = session.pcm_execute(&[0x4B; 40], 0xFF_9150);
        crate::test_set_interrupted(false);

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(session.device().chunks_sent, 0);
    }

    #[test]
    fn test_plan_covers_payload_exactly_once() {
        for (len, mss) in [(400, 76), (1, 76), (64, 76), (128, 76), (4096, 2048 + 12)] {
            let plan = plan_upload(len, mss);
            let mut covered = vec![false; len];
            for chunk in &plan {
                for i in chunk.offset..chunk.offset + chunk.len {
                    assert!(!covered[i], "byte {i} covered twice");
                    covered[i] = true;
                }
                assert!(chunk.len + CHUNK_OVERHEAD <= mss);
            }
            assert!(covered.iter().all(|&c| c), "gap in coverage for len {len}");
            assert_eq!(plan.iter().filter(|c| c.execute).count(), 1);
        }
    }

    #[test]
    fn test_plan_400_bytes_at_76_mss() {
        let plan = plan_upload(400, 76);
        let offsets: Vec<usize> = plan.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, [384, 320, 256, 192, 128, 64, 0]);
        assert_eq!(plan[0].len, 16);
        assert!(plan.iter().all(|c| c.execute == (c.offset == 0)));
    }

    #[test]
    fn test_plan_single_remainder_executes() {
        let plan = plan_upload(10, 76);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0], Chunk { offset: 0, len: 10, execute: true });
    }

    #[test]
    fn test_plan_exact_multiple_skips_remainder() {
        let plan = plan_upload(128, 76);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], Chunk { offset: 64, len: 64, execute: false });
        assert_eq!(plan[1], Chunk { offset: 0, len: 64, execute: true });
    }
}
