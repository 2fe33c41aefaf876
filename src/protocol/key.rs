//! Seed/key transforms for the PCM security-access exchange.
//!
//! Each operating-system family selects one fixed 16-bit transform by
//! algorithm id; the id-to-OS lookup happens outside this crate. The
//! transforms are deterministic and side-effect-free.
//!
//! The constants below should be validated against PCM documentation
//! before first use on a new operating system.

use crate::error::{Error, Result};

/// Derive the unlock key for `seed` under the given algorithm id.
pub fn key_for_seed(algorithm_id: u16, seed: u16) -> Result<u16> {
    match algorithm_id {
        1 => Ok(!seed),
        14 => Ok(seed.rotate_left(8).wrapping_add(0x2F4A)),
        40 => Ok(0x934D_u16.wrapping_sub(seed)),
        other => Err(Error::UnknownAlgorithm(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_1_complements() {
        assert_eq!(key_for_seed(1, 0x1234).unwrap(), 0xEDCB);
        assert_eq!(key_for_seed(1, 0xFFFF).unwrap(), 0x0000);
    }

    #[test]
    fn test_algorithm_14_rotates_and_adds() {
        assert_eq!(key_for_seed(14, 0x1234).unwrap(), 0x635C);
    }

    #[test]
    fn test_algorithm_40_subtracts() {
        assert_eq!(key_for_seed(40, 0x0134).unwrap(), 0x9219);
        // Wraps rather than underflows.
        assert_eq!(key_for_seed(40, 0xFFFF).unwrap(), 0x934E);
    }

    #[test]
    fn test_deterministic() {
        for seed in [0x0000, 0x0001, 0x8000, 0xFFFF] {
            assert_eq!(
                key_for_seed(40, seed).unwrap(),
                key_for_seed(40, seed).unwrap()
            );
        }
    }

    #[test]
    fn test_unknown_algorithm() {
        assert!(matches!(
            key_for_seed(99, 0x1234),
            Err(Error::UnknownAlgorithm(99))
        ));
    }
}
