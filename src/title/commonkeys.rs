// title/commonkeys.rs from wadforge
//
// Implements the fixed table of common keys used to wrap and unwrap Title Keys.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommonKeyError {
    #[error("common key index {0} is not valid (must be 0, 1, or 2)")]
    InvalidCommonKeyIndex(u8),
}

/// The retail common key, used by most titles on retail consoles.
pub const COMMON_KEY: [u8; 16] = [
    0xeb, 0xe4, 0x2a, 0x22, 0x5e, 0x85, 0x93, 0xe4,
    0x48, 0xd9, 0xc5, 0x45, 0x73, 0x81, 0xaa, 0xf7,
];

/// The common key used by titles on consoles with their region set to Korea.
pub const KOREAN_KEY: [u8; 16] = [
    0x63, 0xb8, 0x2b, 0xb4, 0xf4, 0x61, 0x4e, 0x2e,
    0x13, 0xf2, 0xfe, 0xfb, 0xba, 0x4c, 0x9b, 0x7e,
];

/// The common key used by titles on the vWii side of the Wii U.
pub const VWII_KEY: [u8; 16] = [
    0x30, 0xbf, 0xc7, 0x6e, 0x7c, 0x19, 0xaf, 0xbb,
    0x23, 0x16, 0x33, 0x30, 0xce, 0xd7, 0xc2, 0x8d,
];

/// The common key used by titles signed with the development certificates.
pub const DEVELOPMENT_KEY: [u8; 16] = [
    0xa1, 0x60, 0x4a, 0x6a, 0x71, 0x23, 0xb5, 0x29,
    0xae, 0x8b, 0xec, 0x32, 0xc8, 0x16, 0xfc, 0xaa,
];

/// Gets the common key matching a Ticket's common key index. Development Tickets always use the
/// development key, no matter what index they declare, so `is_dev` takes priority.
pub fn get_common_key(index: u8, is_dev: bool) -> Result<[u8; 16], CommonKeyError> {
    if is_dev {
        return Ok(DEVELOPMENT_KEY);
    }
    match index {
        0 => Ok(COMMON_KEY),
        1 => Ok(KOREAN_KEY),
        2 => Ok(VWII_KEY),
        _ => Err(CommonKeyError::InvalidCommonKeyIndex(index)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_indices_resolve() {
        assert_eq!(get_common_key(0, false).unwrap(), COMMON_KEY);
        assert_eq!(get_common_key(1, false).unwrap(), KOREAN_KEY);
        assert_eq!(get_common_key(2, false).unwrap(), VWII_KEY);
    }

    #[test]
    fn dev_key_wins_over_index() {
        assert_eq!(get_common_key(0, true).unwrap(), DEVELOPMENT_KEY);
        assert_eq!(get_common_key(9, true).unwrap(), DEVELOPMENT_KEY);
    }

    #[test]
    fn unknown_index_is_rejected() {
        assert!(matches!(
            get_common_key(3, false),
            Err(CommonKeyError::InvalidCommonKeyIndex(3))
        ));
    }
}
