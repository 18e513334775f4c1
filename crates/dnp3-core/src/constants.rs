//! Protocol constants for the DNP3 link and transport layers.

/// First sync byte of every link frame.
pub const SYNC_1: u8 = 0x05;

/// Second sync byte of every link frame.
pub const SYNC_2: u8 = 0x64;

/// Link frame header size in bytes (sync + length + control + addresses + CRC).
pub const HEADER_SIZE: usize = 10;

/// Value of the length field for a fixed (no user data) frame.
pub const FIXED_FRAME_LENGTH: u8 = 5;

/// Maximum data bytes in one CRC-protected user data block.
pub const BLOCK_DATA_SIZE: usize = 16;

/// Maximum size of one user data block including its trailing CRC.
pub const BLOCK_SIZE: usize = BLOCK_DATA_SIZE + CRC_SIZE;

/// Size of a CRC field in bytes.
pub const CRC_SIZE: usize = 2;

/// Maximum user data bytes a single link frame can carry.
pub const MAX_USER_DATA: usize = 250;

/// Library-enforced floor on the configured maximum frame size.
///
/// Below 24 bytes a frame cannot carry even one useful data block.
pub const MIN_FRAME_SIZE: usize = 24;

/// Absolute maximum link frame size on the wire.
///
/// 10-byte header + 250 user data bytes in 16 CRC-protected blocks.
pub const MAX_FRAME_SIZE: usize = 292;

/// Transport sequence numbers wrap at 64 (6-bit field).
pub const TRANSPORT_SEQ_MODULUS: u8 = 64;

/// Minimum application fragment length (a DNP3 application header is
/// at least control + function code).
pub const MIN_FRAGMENT_SIZE: usize = 2;

/// Application-layer CONFIRM function code (byte 1 of a fragment).
pub const APP_FUNC_CONFIRM: u8 = 0x00;

/// Application-layer READ function code (byte 1 of a fragment).
pub const APP_FUNC_READ: u8 = 0x01;
