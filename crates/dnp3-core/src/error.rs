//! Error types for the dnp3-core crate.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    TooShort { min: usize, actual: usize },
    BadSync { offset: usize, value: u8 },
    BadHeaderCrc,
    BadBlockCrc { block: usize },
    InvalidLength(u8),
    UserDataTooLong { len: usize, max: usize },
    InvalidPrimaryFunction(u8),
    InvalidSecondaryFunction(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooShort { min, actual } => {
                write!(f, "frame too short: need at least {min} bytes, got {actual}")
            }
            FrameError::BadSync { offset, value } => {
                write!(f, "bad sync byte at offset {offset}: 0x{value:02X}")
            }
            FrameError::BadHeaderCrc => write!(f, "header CRC mismatch"),
            FrameError::BadBlockCrc { block } => {
                write!(f, "CRC mismatch in user data block {block}")
            }
            FrameError::InvalidLength(v) => write!(f, "invalid length field: {v}"),
            FrameError::UserDataTooLong { len, max } => {
                write!(f, "user data too long: {len} bytes (max {max})")
            }
            FrameError::InvalidPrimaryFunction(v) => {
                write!(f, "invalid primary function code: {v}")
            }
            FrameError::InvalidSecondaryFunction(v) => {
                write!(f, "invalid secondary function code: {v}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}
