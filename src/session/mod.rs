//! PCM session: the high-level operations of the tool.
//!
//! A session owns its device exclusively and is the only place the bus
//! speed, unlock and kernel-running state are tracked. All operations are
//! synchronous; request, response and the next request are totally
//! ordered on the single underlying connection.

mod transaction;
mod transfer;
mod upload;

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::device::{Device, TimeoutScenario, VpwSpeed};
use crate::error::{Error, Result};
use crate::pcm::BlockId;
use crate::protocol::key::key_for_seed;
use crate::protocol::message::Message;
use crate::protocol::{factory, parser};

/// Attempts for a single request/response exchange.
pub(crate) const REQUEST_RETRIES: usize = 5;

/// Pause between retry attempts.
pub(crate) const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Pause after asking a kernel to exit, letting the PCM settle.
const EXIT_KERNEL_DELAY: Duration = Duration::from_millis(50);

/// One session with one PCM over one device.
///
/// Generic over the device type `D`, which must implement the [`Device`]
/// trait; production code binds a pass-through scantool, tests bind a
/// scripted double.
pub struct PcmSession<D: Device> {
    device: D,
    bus_speed: VpwSpeed,
    unlocked: bool,
    kernel_running: bool,
}

impl<D: Device> PcmSession<D> {
    /// Bind a device to a new session.
    pub fn new(device: D) -> Self {
        Self {
            device,
            bus_speed: VpwSpeed::OneX,
            unlocked: false,
            kernel_running: false,
        }
    }

    /// Bring the underlying interface up.
    pub fn initialize(&mut self) -> Result<()> {
        self.device.initialize()
    }

    /// The underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable access to the underlying device.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Current bus speed as this session last commanded it.
    #[must_use]
    pub fn bus_speed(&self) -> VpwSpeed {
        self.bus_speed
    }

    /// Whether security access is open.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// Whether an uploaded kernel currently owns the PCM.
    #[must_use]
    pub fn is_kernel_running(&self) -> bool {
        self.kernel_running
    }

    /// Read the 17-character VIN.
    ///
    /// Three block queries, strictly ordered; a missing response for any
    /// block fails the whole query.
    pub fn query_vin(&mut self) -> Result<String> {
        let b1 = self.request_block(BlockId::Vin1)?;
        let b2 = self.request_block(BlockId::Vin2)?;
        let b3 = self.request_block(BlockId::Vin3)?;
        parser::parse_vin_responses(b1.bytes(), b2.bytes(), b3.bytes())
    }

    /// Read the 12-character serial number.
    pub fn query_serial_number(&mut self) -> Result<String> {
        let b1 = self.request_block(BlockId::Serial1)?;
        let b2 = self.request_block(BlockId::Serial2)?;
        let b3 = self.request_block(BlockId::Serial3)?;
        parser::parse_serial_responses(b1.bytes(), b2.bytes(), b3.bytes())
    }

    /// Read the broadcast code.
    pub fn query_bcc(&mut self) -> Result<String> {
        let response = self.request_block(BlockId::Bcc)?;
        parser::parse_bcc_response(response.bytes())
    }

    /// Read the manufacturers enable counter.
    pub fn query_mec(&mut self) -> Result<u8> {
        let response = self.request_block(BlockId::Mec)?;
        parser::parse_mec_response(response.bytes())
    }

    /// Read the operating system id.
    pub fn query_operating_system_id(&mut self) -> Result<u32> {
        let response = self.request_block(BlockId::OperatingSystemId)?;
        parser::parse_block_u32(response.bytes())
    }

    /// Read the calibration id.
    pub fn query_calibration_id(&mut self) -> Result<u32> {
        let response = self.request_block(BlockId::CalibrationId)?;
        parser::parse_block_u32(response.bytes())
    }

    /// Read the hardware id.
    pub fn query_hardware_id(&mut self) -> Result<u32> {
        let response = self.request_block(BlockId::HardwareId)?;
        parser::parse_block_u32(response.bytes())
    }

    fn request_block(&mut self, block: BlockId) -> Result<Message> {
        self.device.set_timeout(TimeoutScenario::ReadProperty);
        let request = factory::read_block_request(block);
        self.send_request(&request, REQUEST_RETRIES)
            .map_err(|e| match e {
                Error::Timeout(_) => Error::Timeout(format!("no response for {block}")),
                other => other,
            })
    }

    /// Open security access with the seed/key exchange.
    ///
    /// Returns `Ok(false)` when the PCM refuses the derived key; the
    /// refusal reason lands in the log.
    pub fn unlock(&mut self, algorithm_id: u16) -> Result<bool> {
        if self.unlocked {
            return Ok(true);
        }
        self.device.set_timeout(TimeoutScenario::ReadProperty);

        // Keep-alive first so the PCM doesn't drop the session mid-exchange.
        let _ = self.device.send_frame(&factory::device_present_notification());

        let seed_response = self.send_request(&factory::seed_request(), REQUEST_RETRIES)?;
        if parser::is_unlocked(seed_response.bytes()) {
            info!("PCM is already unlocked");
            self.unlocked = true;
            return Ok(true);
        }

        let seed = parser::parse_seed(seed_response.bytes())?;
        if seed == 0x0000 {
            info!("this operating system does not require an unlock");
            self.unlocked = true;
            return Ok(true);
        }

        let key = key_for_seed(algorithm_id, seed)?;
        debug!("seed {seed:04X} -> key {key:04X} (algorithm {algorithm_id})");
        let response = self.send_request(&factory::unlock_request(key), REQUEST_RETRIES)?;
        match parser::parse_unlock_response(response.bytes()) {
            Ok(accepted) => {
                if accepted {
                    info!("PCM unlocked");
                    self.unlocked = true;
                }
                Ok(accepted)
            }
            Err(Error::Refused(reason)) => {
                warn!("PCM refused the key: {reason}");
                Ok(false)
            }
            Err(other) => Err(other),
        }
    }

    /// Write the 17-character VIN across its three blocks.
    pub fn write_vin(&mut self, vin: &str) -> Result<()> {
        if vin.len() != 17 || !vin.is_ascii() {
            return Err(Error::Protocol(format!(
                "VIN must be 17 ASCII characters, got {:?}",
                vin
            )));
        }
        let v = vin.as_bytes();
        let mut first = [0u8; 6];
        first[1..].copy_from_slice(&v[..5]);
        self.write_block(BlockId::Vin1, &first)?;
        self.write_block(BlockId::Vin2, &v[5..11])?;
        self.write_block(BlockId::Vin3, &v[11..17])?;
        info!("VIN updated to {vin}");
        Ok(())
    }

    /// Write one logical block.
    ///
    /// Success is the byte-for-byte acknowledgement `6C F0 10 7B <block>`;
    /// anything else from the PCM is a rejection, reported distinctly
    /// from a communications failure.
    pub fn write_block(&mut self, block: BlockId, data: &[u8]) -> Result<()> {
        if !self.unlocked {
            return Err(Error::Protocol(format!(
                "cannot write {block} while the PCM is locked"
            )));
        }
        if data.len() != block.payload_len() {
            return Err(Error::Protocol(format!(
                "{block} takes {} bytes, got {}",
                block.payload_len(),
                data.len()
            )));
        }
        self.device.set_timeout(TimeoutScenario::WriteMemory);
        let request = factory::write_block_request(block, data);
        let response = self.send_request(&request, REQUEST_RETRIES)?;
        if response == factory::write_block_ack(block) {
            debug!("wrote {block}");
            Ok(())
        } else {
            Err(Error::Refused("PCM rejected attempt".into()))
        }
    }

    /// Negotiate the bus up to 4x VPW.
    ///
    /// Returns `Ok(false)` if the PCM declines; the device speed is only
    /// touched once the PCM has agreed. A device without 4x support
    /// leaves everything untouched and reports success at 1x.
    pub fn enter_high_speed(&mut self) -> Result<bool> {
        if !self.device.supports_4x() {
            debug!("device does not support 4x, staying at 1x");
            return Ok(true);
        }
        if self.bus_speed == VpwSpeed::FourX {
            return Ok(true);
        }

        let response = self.send_request(&factory::high_speed_check(), REQUEST_RETRIES)?;
        let ok_prefix = factory::high_speed_ok_response();
        if !response.bytes().starts_with(ok_prefix.bytes()) {
            info!("PCM declined 4x mode");
            return Ok(false);
        }

        // Every module still talking must hear the switch.
        self.device.send_frame(&factory::begin_high_speed())?;
        if let Err(e) = self.device.set_speed(VpwSpeed::FourX) {
            // The PCM already switched; drag everything back to 1x.
            self.bus_speed = VpwSpeed::FourX;
            self.recover();
            return Err(e);
        }
        self.bus_speed = VpwSpeed::FourX;
        info!("bus running at 4x");
        Ok(true)
    }

    /// Quiet the bus. Best-effort; a lost frame here only means more
    /// chatter to filter later.
    pub(crate) fn suppress_chatter(&mut self) {
        let _ = self
            .device
            .send_frame(&factory::disable_normal_message_transmission());
    }

    /// Force the PCM and the device back to a drivable state.
    ///
    /// Asks any running kernel to exit twice, bracketing the drop back to
    /// 1x so the request goes out at both speeds, then commands the
    /// device to 1x. Send failures are ignored; this must never make
    /// things worse.
    pub fn recover(&mut self) {
        debug!("restoring normal bus state");
        let exit = factory::exit_kernel();

        let _ = self.device.send_frame(&exit);
        thread::sleep(EXIT_KERNEL_DELAY);
        if self.bus_speed == VpwSpeed::FourX {
            let _ = self.device.set_speed(VpwSpeed::OneX);
        }
        let _ = self.device.send_frame(&exit);
        thread::sleep(EXIT_KERNEL_DELAY);
        let _ = self.device.set_speed(VpwSpeed::OneX);

        self.bus_speed = VpwSpeed::OneX;
        self.kernel_running = false;
        self.unlocked = false;
    }
}

impl<D: Device> Drop for PcmSession<D> {
    fn drop(&mut self) {
        if self.kernel_running || self.bus_speed == VpwSpeed::FourX {
            self.recover();
        }
    }
}
