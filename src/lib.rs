//! # pcmflash
//!
//! A library for reflashing and interrogating GM powertrain control
//! modules over the VPW (J1850) bus.
//!
//! This crate provides the transaction core of a host-side flashing
//! tool, including:
//!
//! - VPW message framing with the block checksum
//! - Identifier queries (VIN, serial number, BCC, MEC, OS/HW/CAL ids)
//! - Seed/key security access
//! - 1x to 4x bus-speed negotiation
//! - Kernel upload into PCM RAM with execute-on-last-chunk semantics
//! - Bulk flash read (literal and run-length-encoded responses) and
//!   full flash write
//!
//! The physical interface (ELM/AVT serial adapter, J2534 pass-through)
//! is abstracted behind the [`Device`] trait; this crate never opens a
//! port itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pcmflash::{Device, PcmInfo, PcmSession};
//!
//! fn dump<D: Device>(device: D) -> pcmflash::Result<Vec<u8>> {
//!     let info = PcmInfo::new();
//!     let mut session = PcmSession::new(device);
//!     session.initialize()?;
//!
//!     println!("VIN: {}", session.query_vin()?);
//!
//!     session.unlock(info.key_algorithm_id)?;
//!     session.enter_high_speed()?;
//!
//!     let kernel = pcmflash::kernel::load(&pcmflash::kernel::resolve("read-kernel.bin")?)?;
//!     session.pcm_execute(&kernel, info.kernel_base_address)?;
//!     session.read_contents(&info)
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod expr;
pub mod kernel;
pub mod pcm;
pub mod protocol;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library
/// loops.
///
/// The checker should return `true` when the current operation should
/// stop (for example after receiving Ctrl-C in CLI applications). The
/// session still runs its bus-recovery sequence after an interrupted
/// transfer.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding
/// application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER.get().is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(cancelled: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static CANCEL_REQUESTED: AtomicBool = AtomicBool::new(false);

    // First caller installs the checker; everyone just flips the flag.
    let _ = INTERRUPT_CHECKER.set(Arc::new(|| CANCEL_REQUESTED.load(Ordering::SeqCst)));
    CANCEL_REQUESTED.store(cancelled, Ordering::SeqCst);
}

// Re-exports for convenience
pub use {
    device::{Device, TimeoutScenario, VpwSpeed},
    error::{Error, Result},
    expr::{MathExpression, Variables},
    pcm::{BlockId, PcmInfo},
    protocol::{append_block_sum, calc_block_sum, Message},
    session::PcmSession,
};
