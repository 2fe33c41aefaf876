//! Request/response plumbing with bounded retry.
//!
//! This layer never interprets frames. It sends, waits, filters out bus
//! chatter, and hands whatever arrives to the caller.

use std::thread;

use log::{debug, trace};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::protocol::message::Message;
use crate::protocol::mode;
use crate::session::{PcmSession, RETRY_DELAY};

impl<D: Device> PcmSession<D> {
    /// Send `request` and return the first substantive frame that comes
    /// back, retrying the whole exchange up to `retries` times.
    pub(crate) fn send_request(&mut self, request: &Message, retries: usize) -> Result<Message> {
        for attempt in 1..=retries {
            if attempt > 1 {
                trace!("attempt {attempt}/{retries}: {request}");
            }
            match self.device.send_frame(request) {
                Ok(()) => {
                    while let Some(frame) = self.device.receive_frame() {
                        if is_chatter(&frame) {
                            trace!("dropping chatter: {frame}");
                            continue;
                        }
                        return Ok(frame);
                    }
                }
                Err(e) => debug!("send failed: {e}"),
            }
            thread::sleep(RETRY_DELAY);
        }
        Err(Error::Timeout(format!(
            "no response after {retries} attempts"
        )))
    }
}

/// Frames other modules emit on their own: tool-present keep-alives and
/// runt frames. Never an answer to anything.
fn is_chatter(frame: &Message) -> bool {
    frame.len() < 4 || frame.frame_mode() == Some(mode::DEVICE_PRESENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_present_is_chatter() {
        assert!(is_chatter(&Message::new(vec![0x6C, 0xFE, 0xF0, 0x3F])));
    }

    #[test]
    fn test_runt_frame_is_chatter() {
        assert!(is_chatter(&Message::new(vec![0x6C, 0xF0])));
    }

    #[test]
    fn test_response_is_not_chatter() {
        assert!(!is_chatter(&Message::new(vec![
            0x6C, 0xF0, 0x10, 0x7C, 0x01
        ])));
    }
}
