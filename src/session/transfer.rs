//! Bulk flash transfer: streaming the image out of and into the PCM.
//!
//! Both directions talk to an uploaded kernel and always finish by
//! restoring normal bus state; leaving the kernel running or the bus at
//! 4x is a vehicle-operability hazard.

use std::io::Read;
use std::path::Path;
use std::thread;

use log::{debug, info, trace};

use crate::device::{Device, TimeoutScenario};
use crate::error::{Error, Result};
use crate::kernel;
use crate::pcm::PcmInfo;
use crate::protocol::message::Message;
use crate::protocol::parser::ReadPayload;
use crate::protocol::{factory, parser, FLASH_UPLOAD_BUFFER};
use crate::session::{PcmSession, RETRY_DELAY};

/// Bytes requested per read block; sized to fit one VPW frame with room
/// to spare.
const READ_BLOCK_SIZE: usize = 200;

/// Payload bytes per flash-write frame.
const FLASH_CHUNK_SIZE: usize = 192;

/// Attempts per block before the transfer is abandoned.
const BLOCK_RETRIES: usize = 5;

/// Response frames inspected per send before retrying.
const VALIDATE_WINDOW: usize = 10;

impl<D: Device> PcmSession<D> {
    /// Stream the full flash image out of the PCM.
    ///
    /// Requires security access and a running read kernel. Whatever
    /// happens, the exit-kernel recovery sequence runs before this
    /// returns.
    pub fn read_contents(&mut self, info: &PcmInfo) -> Result<Vec<u8>> {
        let result = self.try_read_contents(info);
        self.recover();
        result
    }

    fn try_read_contents(&mut self, info: &PcmInfo) -> Result<Vec<u8>> {
        if !self.is_unlocked() || !self.is_kernel_running() {
            return Err(Error::Protocol(
                "bulk read requires an unlocked PCM with the read kernel running".into(),
            ));
        }
        self.device.set_timeout(TimeoutScenario::ReadProperty);

        let total = info.image_size as usize;
        let mut image = vec![0u8; total];
        let base = info.image_base_address;
        let end = base + info.image_size;
        let mut address = base;
        let mut last_percent = 0;

        info!("reading {total} bytes from {base:06X}");
        while address < end {
            if crate::is_interrupt_requested() {
                return Err(Error::Cancelled);
            }
            let len = READ_BLOCK_SIZE.min((end - address) as usize);
            self.suppress_chatter();
            let advanced = self.read_block(&mut image, base, address, len)?;
            address += advanced as u32;

            let percent = ((address - base) as usize * 100) / total;
            if percent != last_percent {
                info!("flash read {percent}%");
                last_percent = percent;
            }
        }
        Ok(image)
    }

    /// One block with bounded retries: request, ack, payload.
    ///
    /// Returns the number of image bytes filled in, which for a
    /// run-length response is the run the PCM chose to send.
    fn read_block(
        &mut self,
        image: &mut [u8],
        base: u32,
        address: u32,
        len: usize,
    ) -> Result<usize> {
        let request = factory::read_request(address, len as u16);
        for _ in 0..BLOCK_RETRIES {
            let ack = match self.send_request(&request, 1) {
                Ok(frame) => frame,
                Err(_) => continue,
            };
            match parser::parse_read_response(ack.bytes()) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("PCM rejected read at {address:06X}, retrying");
                    continue;
                }
                Err(e) => {
                    trace!("unexpected read ack: {e}");
                    continue;
                }
            }

            // The payload rides in its own frame, always after the ack.
            let Some(payload) = self.device.receive_frame() else {
                continue;
            };
            let offset = (address - base) as usize;
            match parser::parse_read_payload(payload.bytes(), len) {
                Ok(ReadPayload::Literal(data)) => {
                    image[offset..offset + len].copy_from_slice(data);
                    return Ok(len);
                }
                Ok(ReadPayload::RunLength { run, value }) => {
                    if offset + run > image.len() {
                        debug!("run of {run} overruns the image, retrying");
                        continue;
                    }
                    image[offset..offset + run].fill(value);
                    return Ok(run);
                }
                Err(e) => {
                    trace!("bad payload frame: {e}");
                    continue;
                }
            }
        }
        Err(Error::Timeout(format!(
            "unable to read block at {address:06X}"
        )))
    }

    /// Rewrite the full flash image from `stream`.
    ///
    /// Loads and executes the write kernel first if none is running.
    /// The recovery sequence runs whatever the outcome.
    pub fn write_contents<R: Read>(
        &mut self,
        info: &PcmInfo,
        kernel_path: &Path,
        stream: &mut R,
    ) -> Result<()> {
        let result = self.try_write_contents(info, kernel_path, stream);
        self.recover();
        result
    }

    fn try_write_contents<R: Read>(
        &mut self,
        info: &PcmInfo,
        kernel_path: &Path,
        stream: &mut R,
    ) -> Result<()> {
        self.device.clear_queue();

        if !self.is_kernel_running() {
            if crate::is_interrupt_requested() {
                return Err(Error::Cancelled);
            }
            let payload = kernel::load(kernel_path)?;
            if crate::is_interrupt_requested() {
                return Err(Error::Cancelled);
            }
            self.pcm_execute(&payload, info.kernel_base_address)?;
        }

        // The PCM stalls for whole seconds while erasing.
        self.device.set_timeout(TimeoutScenario::Maximum);
        self.send_and_validate(
            &factory::start_full_flash(),
            parser::parse_start_full_flash_response,
            "start full flash",
            BLOCK_RETRIES,
            true,
        )?;

        let total = info.image_size as usize;
        let mut written = 0usize;
        let mut buffer = [0u8; FLASH_CHUNK_SIZE];
        loop {
            if crate::is_interrupt_requested() {
                return Err(Error::Cancelled);
            }
            let n = fill_from(stream, &mut buffer)?;
            if n == 0 {
                break;
            }
            let frame = factory::block_message(&buffer[..n], FLASH_UPLOAD_BUFFER, false);
            self.send_and_validate(
                &frame,
                parser::parse_block_transfer_ack,
                "flash block",
                BLOCK_RETRIES,
                true,
            )?;
            written += n;
            info!("flash write {}%", written * 100 / total.max(1));
        }

        info!("flash write complete ({written} bytes)");
        Ok(())
    }

    /// Rewrite the calibration segment only.
    pub fn write_calibration<R: Read>(&mut self, _info: &PcmInfo, _stream: &mut R) -> Result<()> {
        // TODO: narrower address range once the calibration segment map
        // is pinned down.
        Err(Error::Unsupported("calibration-only write".into()))
    }

    /// Send a frame and scan subsequent traffic for an acknowledgement
    /// the `validator` accepts.
    ///
    /// `Ok(false)` from the validator is an explicit refusal and aborts;
    /// an error marks the frame as unrelated and scanning continues.
    /// With `ping_kernel`, a silent window triggers a liveness ping
    /// before the next attempt.
    pub(crate) fn send_and_validate<V>(
        &mut self,
        request: &Message,
        validator: V,
        description: &str,
        max_attempts: usize,
        ping_kernel: bool,
    ) -> Result<()>
    where
        V: Fn(&[u8]) -> Result<bool>,
    {
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                debug!("{description}: attempt {attempt}/{max_attempts}");
            }
            if let Err(e) = self.device.send_frame(request) {
                debug!("{description}: send failed: {e}");
                thread::sleep(RETRY_DELAY);
                continue;
            }
            match self.wait_for_success(&validator) {
                Some(true) => return Ok(()),
                Some(false) => return Err(Error::Refused(format!("{description} rejected"))),
                None => {
                    if ping_kernel && !self.wait_for_kernel(1) {
                        debug!("{description}: kernel not answering pings");
                    }
                }
            }
        }
        Err(Error::Timeout(format!("{description}: no valid response")))
    }

    fn wait_for_success<V>(&mut self, validator: &V) -> Option<bool>
    where
        V: Fn(&[u8]) -> Result<bool>,
    {
        for _ in 0..VALIDATE_WINDOW {
            let frame = self.device.receive_frame()?;
            match validator(frame.bytes()) {
                Ok(verdict) => return Some(verdict),
                Err(e) => trace!("skipping unrelated frame: {e}"),
            }
        }
        None
    }

    /// Ping the kernel until it answers or attempts run out.
    pub(crate) fn wait_for_kernel(&mut self, attempts: usize) -> bool {
        let ping = factory::kernel_ping();
        for _ in 0..attempts {
            if self.device.send_frame(&ping).is_err() {
                continue;
            }
            while let Some(frame) = self.device.receive_frame() {
                if parser::parse_kernel_ping_response(frame.bytes()).unwrap_or(false) {
                    return true;
                }
            }
        }
        false
    }
}

/// Fill `buffer` from `stream`, tolerating short reads; returns the
/// number of bytes placed, zero at end of stream.
fn fill_from<R: Read>(stream: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = stream.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
